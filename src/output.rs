use chrono::Local;

use crate::backend::FlightSummary;
use crate::session::{Message, Role};
use crate::upload::UploadResult;

const UNAVAILABLE: &str = "unavailable";
const BAR_WIDTH: usize = 30;

/// Lines describing a finished upload. Missing summary fields say so.
pub fn render_upload(file_name: &str, result: &UploadResult) -> Vec<String> {
    let summary: &FlightSummary = &result.summary;

    let max_altitude = summary
        .max_altitude
        .map(|alt| format!("{:.2}m", alt))
        .unwrap_or_else(|| UNAVAILABLE.to_string());
    let flight_time = summary
        .flight_time_seconds
        .map(|secs| format!("{:.1}s", secs))
        .unwrap_or_else(|| UNAVAILABLE.to_string());
    let message_types = summary
        .message_types
        .as_ref()
        .map(|types| types.len().to_string())
        .unwrap_or_else(|| UNAVAILABLE.to_string());

    vec![
        "Upload Successful!".to_string(),
        format!("File: {}", file_name),
        format!("Log ID: {}", result.log_id),
        format!("Max Altitude: {}", max_altitude),
        format!("Flight Time: {}", flight_time),
        format!("Message Types: {}", message_types),
    ]
}

pub fn render_message(message: &Message) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "analyst",
        Role::Error => "error",
    };
    format!("[{}] {}: {}", time, speaker, message.content)
}

pub fn render_progress(percent: u8) -> String {
    let percent = percent.min(100) as usize;
    let filled = percent * BAR_WIDTH / 100;
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        percent
    )
}
