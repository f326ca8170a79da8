//! Markdown rendering of logbook entries for prompt context.
//!
//! Formatting lives here, next to the retrieval core, so the agent
//! receives LLM-ready blocks instead of re-assembling metadata itself.

use crate::elog::types::ElogHit;

/// Render one entry as a markdown block.
pub fn format_entry_for_llm(hit: &ElogHit) -> String {
    let (date_str, time_str) = match hit.parsed_timestamp() {
        Some(ts) => (ts.format("%Y-%m-%d").to_string(), ts.format("%H:%M:%S").to_string()),
        None => ("N/A".to_string(), "N/A".to_string()),
    };

    let or_na = |s: &str| if s.is_empty() { "N/A".to_string() } else { s.to_string() };
    let link_host = hit
        .url
        .split("//")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("elog");

    let mut formatted = format!("### ELOG Entry #{}: {}\n\n", hit.elog_id, or_na(&hit.title));
    formatted.push_str(&format!("**Date/Time:** {} at {}\n", date_str, time_str));
    formatted.push_str(&format!("**Author:** {}\n", or_na(&hit.author)));
    formatted.push_str(&format!("**Category:** {}\n", or_na(&hit.category)));
    formatted.push_str(&format!(
        "**System:** {} | **Domain:** {}\n",
        or_na(&hit.system),
        or_na(&hit.domain)
    ));
    formatted.push_str(&format!("**Effect:** {}\n", or_na(&hit.effect)));
    formatted.push_str(&format!("**Link:** [{}/{}]({})\n\n", link_host, hit.elog_id, hit.url));
    formatted.push_str(&format!("**Content:**\n{}\n", hit.body_clean));

    if !hit.attachments.is_empty() {
        formatted.push_str(&format!(
            "\n**Attachments ({} file(s)):**\n",
            hit.attachments.len()
        ));
        for attachment in &hit.attachments {
            formatted.push_str(&format!("- [{}]({})\n", attachment.name, attachment.url));
        }
    }

    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elog::types::Attachment;

    fn sample_hit() -> ElogHit {
        ElogHit {
            elog_id:     39109,
            timestamp:   "Thu, 16 Oct 2025 21:13:14 +0200".to_string(),
            author:      "Operator".to_string(),
            category:    "Problem".to_string(),
            system:      "RF".to_string(),
            domain:      "Linac2".to_string(),
            section:     String::new(),
            effect:      "Beam down 20 min".to_string(),
            title:       "Klystron trip".to_string(),
            body_html:   String::new(),
            body_clean:  "Station S20 tripped twice.".to_string(),
            url:         "https://elog-gfa.psi.ch/SwissFEL+commissioning/39109".to_string(),
            attachments: vec![Attachment {
                name: "trace.png".to_string(),
                url:  "https://elog-gfa.psi.ch/SwissFEL+commissioning/trace.png".to_string(),
            }],
            parent_id:      None,
            replies:        vec![],
            semantic_score: 0.0,
            final_score:    0.0,
        }
    }

    #[test]
    fn renders_metadata_and_link() {
        let formatted = format_entry_for_llm(&sample_hit());
        assert!(formatted.contains("### ELOG Entry #39109: Klystron trip"));
        assert!(formatted.contains("**Date/Time:** 2025-10-16 at 21:13:14"));
        assert!(formatted.contains("[elog-gfa.psi.ch/39109](https://elog-gfa.psi.ch/SwissFEL+commissioning/39109)"));
        assert!(formatted.contains("**System:** RF | **Domain:** Linac2"));
        assert!(formatted.contains("- [trace.png]"));
    }

    #[test]
    fn missing_fields_render_as_na() {
        let mut hit = sample_hit();
        hit.timestamp = String::new();
        hit.author = String::new();
        let formatted = format_entry_for_llm(&hit);
        assert!(formatted.contains("**Date/Time:** N/A at N/A"));
        assert!(formatted.contains("**Author:** N/A"));
    }
}
