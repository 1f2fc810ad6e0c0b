//! Discord webhook embeds.

use chrono::SecondsFormat;
use serde::Serialize;

use crate::Result;
use crate::database::models::{EventDbModel, Severity};

/// Discord caps embed titles at 256 characters.
const MAX_TITLE_CHARS: usize = 256;
/// Discord caps embed descriptions at 4096 characters.
const MAX_DESCRIPTION_CHARS: usize = 4096;

const USERNAME: &str = "lnpulse";

#[derive(Debug, Serialize)]
struct DiscordPayload {
    username: &'static str,
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
    fields: Vec<EmbedField>,
    footer: EmbedFooter,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: &'static str,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: String,
}

/// Embed color for a severity.
pub fn get_color(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x3498db,    // Blue
        Severity::Warning => 0xf1c40f, // Yellow
        Severity::Error => 0xe74c3c,   // Red
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn node_label(event: &EventDbModel) -> String {
    let short_id: String = event.node_id.chars().take(8).collect();
    if event.node_alias.is_empty() {
        short_id
    } else {
        format!("{} ({}…)", event.node_alias, short_id)
    }
}

/// Render the Discord body for an event.
pub fn build_payload(event: &EventDbModel) -> Result<String> {
    // Unknown stored values render as Info rather than failing the delivery.
    let severity = event.get_severity().unwrap_or(Severity::Info);
    let type_label = event
        .get_event_type()
        .map(|t| t.label().to_string())
        .unwrap_or_else(|| event.event_type.clone());

    let payload = DiscordPayload {
        username: USERNAME,
        embeds: vec![Embed {
            title: truncate(&event.title, MAX_TITLE_CHARS),
            description: truncate(&event.description, MAX_DESCRIPTION_CHARS),
            color: get_color(severity),
            timestamp: event
                .timestamp_utc()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            fields: vec![
                EmbedField {
                    name: "Event Type",
                    value: type_label,
                    inline: true,
                },
                EmbedField {
                    name: "Severity",
                    value: severity.as_str().to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "Node",
                    value: node_label(event),
                    inline: false,
                },
            ],
            footer: EmbedFooter {
                text: format!("lnpulse | event {}", event.id),
            },
        }],
    };

    Ok(serde_json::to_string(&payload)?)
}
