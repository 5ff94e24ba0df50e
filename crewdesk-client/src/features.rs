//! Per-turn feature detection and fallback decision.
//!
//! Some requests need capabilities only the native provider serves:
//! document generation, prototype generation, and attachment reading. The
//! decision is made once, before the loop starts, from the message text
//! and the selected provider's declared capabilities.

use std::sync::OnceLock;

use crewdesk_core::provider::ProviderCaps;
use regex::Regex;

/// A capability the request needs from its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedFeature {
    Docs,
    Prototype,
    Attachments,
}

impl RequestedFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docs => "docs",
            Self::Prototype => "prototype",
            Self::Attachments => "attachments",
        }
    }
}

fn docs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(pptx?|slides?|slide deck|deck|presentation|quotation|quote sheet|price quote|inspection (sheet|form|report))\b",
        )
        .unwrap()
    })
}

fn proto_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(prototype|wireframes?|mockups?|clickable (demo|pages?))\b").unwrap()
    })
}

/// What this message will need.
pub fn detect_features(message: &str, has_attachments: bool) -> Vec<RequestedFeature> {
    let mut features = Vec::new();
    if docs_re().is_match(message) {
        features.push(RequestedFeature::Docs);
    }
    if proto_re().is_match(message) {
        features.push(RequestedFeature::Prototype);
    }
    if has_attachments {
        features.push(RequestedFeature::Attachments);
    }
    features
}

/// The subset of `features` the provider cannot serve. Non-empty means the
/// turn falls back to the native provider.
pub fn unserved_features(caps: ProviderCaps, features: &[RequestedFeature]) -> Vec<RequestedFeature> {
    features
        .iter()
        .copied()
        .filter(|feature| match feature {
            RequestedFeature::Docs | RequestedFeature::Prototype => !caps.generate_docs,
            RequestedFeature::Attachments => !caps.read_attachments,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ppt_request_detected() {
        let features = detect_features("generate a PPT titled Alpha", false);
        assert_eq!(features, vec![RequestedFeature::Docs]);
    }

    #[test]
    fn test_quotation_detected() {
        assert!(detect_features("please draft a quotation for 3 sensors", false)
            .contains(&RequestedFeature::Docs));
    }

    #[test]
    fn test_prototype_detected() {
        assert!(detect_features("build a clickable prototype of the console", false)
            .contains(&RequestedFeature::Prototype));
    }

    #[test]
    fn test_plain_chat_detects_nothing() {
        assert!(detect_features("what does this error mean?", false).is_empty());
    }

    #[test]
    fn test_attachments_flag() {
        let features = detect_features("summarize this", true);
        assert_eq!(features, vec![RequestedFeature::Attachments]);
    }

    #[test]
    fn test_unserved_against_full_caps_is_empty() {
        let features = detect_features("make a slide deck", true);
        assert!(unserved_features(ProviderCaps::FULL, &features).is_empty());
    }

    #[test]
    fn test_unserved_against_cli_caps() {
        let features = vec![RequestedFeature::Docs, RequestedFeature::Attachments];
        let unserved = unserved_features(ProviderCaps::default(), &features);
        assert_eq!(unserved.len(), 2);
    }
}
