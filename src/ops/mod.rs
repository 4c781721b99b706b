//! Typed operation catalog: each operation builds one console command (two
//! for passphrase exchanges), dispatches it, and decodes the reply.
//!
//! The console reports failures as free text inside an otherwise ordinary
//! reply, so decoding starts from a shared classification of failure
//! markers; operation-specific parsing happens per module.

pub mod balloon;
pub mod block;
pub mod fdpass;
pub mod lifecycle;
pub mod memory;
pub mod migrate;
pub mod netdev;
pub mod pci;
pub mod usb;

use crate::errors::{MonitorError, MonitorResult};
use crate::session::dispatch::Reply;

/// Failure markers scraped from console reply text. The console predates
/// structured errors; these are the phrasings it actually emits.
const NOT_FOUND_MARKS: &[&str] = &[
    "not found",
    "no such",
    "could not find",
    "no usb device",
    "no host device",
];
const AMBIGUOUS_MARKS: &[&str] = &["multiple"];
const REJECTED_MARKS: &[&str] = &[
    "unknown command",
    "could not",
    "failed",
    "error",
    "is locked",
    "invalid",
    "denied",
];

/// Classify a reply, turning console failure text into a typed error.
/// Replies carrying no failure marker are successes; benign informational
/// text is ignored.
pub(crate) fn check_reply(op: &'static str, reply: &Reply) -> MonitorResult<()> {
    let text = reply.text();
    let lower = text.to_ascii_lowercase();
    if NOT_FOUND_MARKS.iter().any(|m| lower.contains(m)) {
        return Err(MonitorError::NotFound(format!("{op}: {}", first_line(text))));
    }
    if AMBIGUOUS_MARKS.iter().any(|m| lower.contains(m)) {
        return Err(MonitorError::Ambiguous(format!(
            "{op}: {}",
            first_line(text)
        )));
    }
    if REJECTED_MARKS.iter().any(|m| lower.contains(m)) {
        return Err(MonitorError::failed(op, first_line(text)));
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Parse the decimal run following `key` anywhere in `text`.
pub(crate) fn number_after<'t>(text: &'t str, key: &str) -> Option<u64> {
    let rest = &text[text.find(key)? + key.len()..];
    let digits: &str = {
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        &rest[..end]
    };
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> Reply {
        Reply::for_tests(text)
    }

    #[test]
    fn test_check_reply_success_on_benign_text() {
        assert!(check_reply("eject", &reply("")).is_ok());
        assert!(check_reply("eject", &reply("done")).is_ok());
    }

    #[test]
    fn test_check_reply_not_found() {
        let err = check_reply("eject", &reply("device 'hdd' not found")).unwrap_err();
        assert!(matches!(err, MonitorError::NotFound(msg) if msg.contains("hdd")));
    }

    #[test]
    fn test_check_reply_ambiguous() {
        let err = check_reply("usb_add", &reply("multiple usb devices match")).unwrap_err();
        assert!(matches!(err, MonitorError::Ambiguous(_)));
    }

    #[test]
    fn test_check_reply_rejected() {
        let err = check_reply("balloon", &reply("unknown command: 'balloon'")).unwrap_err();
        assert!(matches!(err, MonitorError::OperationFailed { .. }));
    }

    #[test]
    fn test_number_after() {
        assert_eq!(number_after("transferred ram: 1024 kbytes", "transferred ram: "), Some(1024));
        assert_eq!(number_after("slot 4, done", "slot "), Some(4));
        assert_eq!(number_after("no numbers here", "slot "), None);
    }
}
