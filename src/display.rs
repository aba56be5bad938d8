//! Plain-text rendering of scan results for the terminal.
use serde_json::Value;
use std::fmt::Write;

use crate::model::{AdminStats, Equipment, Issue, PendingRegistration};

/// `warranty_expiry` → `Warranty Expiry`: underscores become spaces and the
/// first letter of every word is upper-cased.
pub fn format_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut at_word_start = true;
    for c in key.chars() {
        let c = if c == '_' { ' ' } else { c };
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

pub fn render_equipment(equipment: &Equipment) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Equipment {}", equipment.id);
    let _ = writeln!(out, "  Business: {}", equipment.business.name);
    let _ = writeln!(out, "  Type: {}", equipment.kind);
    let _ = writeln!(out, "  Status: {}", equipment.status.label());
    if !equipment.location.is_empty() {
        let _ = writeln!(out, "  Location: {}", equipment.location);
    }
    for (key, value) in &equipment.more_fields {
        let _ = writeln!(out, "  {}: {}", format_key(key), format_value(value));
    }
    out
}

pub fn render_issues(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return "No issues reported.\n".to_string();
    }
    let mut out = String::new();
    for issue in issues {
        let _ = writeln!(
            out,
            "[{}] {} ({}) - {}",
            issue.date_submitted.format("%Y-%m-%d"),
            issue.title,
            issue.progress,
            issue.id
        );
        if !issue.description.is_empty() {
            let _ = writeln!(out, "    {}", issue.description);
        }
    }
    out
}

pub fn render_registration(reg: &PendingRegistration) -> String {
    format!(
        "{}  {:<20} {:<32} {:>3}d  {}",
        reg.id, reg.user.username, reg.user.email, reg.days_pending, reg.urgency_level
    )
}

pub fn render_stats(stats: &AdminStats) -> String {
    format!(
        "pending: {}  urgent: {}  today: {}  this week: {}",
        stats.total_pending, stats.urgent_count, stats.today_count, stats.weekly_count
    )
}
