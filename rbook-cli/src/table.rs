/// Table rendering for CLI output using comfy-table

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use rbook_core::{PendingSubmission, Roster};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn format_pending_table(pending: &[PendingSubmission]) -> String {
    if pending.is_empty() {
        return "No pending submissions".to_string();
    }

    let mut table = new_table();
    table.set_header(vec![
        "id", "slot", "date", "class", "present", "absent", "od", "leave", "retries", "last error",
    ]);

    for sub in pending {
        let counts = sub.status_counts();
        table.add_row(vec![
            Cell::new(&sub.id),
            Cell::new(&sub.class.slot_id),
            Cell::new(&sub.class.date),
            Cell::new(sub.class.class_key()),
            Cell::new(counts.present),
            Cell::new(counts.absent),
            Cell::new(counts.od),
            Cell::new(counts.leave),
            Cell::new(sub.retry_count),
            Cell::new(sub.last_error.as_deref().unwrap_or("-")),
        ]);
    }

    table.to_string()
}

pub fn format_roster_table(roster: &Roster) -> String {
    let mut table = new_table();
    table.set_header(vec!["roll no", "name", "id", "batch", "beacon"]);

    for student in &roster.students {
        table.add_row(vec![
            Cell::new(&student.roll_no),
            Cell::new(&student.name),
            Cell::new(&student.id),
            Cell::new(student.batch.map_or_else(|| "-".to_string(), |b| b.to_string())),
            Cell::new(student.beacon_id.as_deref().unwrap_or("-")),
        ]);
    }

    format!(
        "{} ({}), {} students, cached {}\n{}",
        roster.class_key,
        roster.subject_name,
        roster.students.len(),
        roster.cached_at.to_rfc3339(),
        table
    )
}

/// Two-column key/value table
pub fn format_pairs(rows: &[(&str, String)]) -> String {
    let mut table = new_table();
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    table.to_string()
}
