//! Stream key masking
//!
//! The resolved output URL is only ever passed to the transcoder as an
//! argument. Every line that reaches a log, a tail or the terminal goes
//! through [`LogMasker`] first.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::StreamTarget;

const MASK: &str = "****";
const VISIBLE_PREFIX: usize = 4;

fn rtmp_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(rtmps?://[^\s'"]+/)([^\s'"/]+)"#).expect("static regex is valid")
    })
}

/// Keep the first few characters of a secret and hide the rest
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(VISIBLE_PREFIX).collect();
    if secret.chars().count() <= VISIBLE_PREFIX * 2 {
        MASK.to_string()
    } else {
        format!("{}{}", visible, MASK)
    }
}

/// Hide the final path segment of an RTMP URL, where the stream key lives
pub fn mask_url(url: &str) -> String {
    let masked = rtmp_url_regex().replace_all(url, format!("${{1}}{}", MASK).as_str());
    if masked == url && (url.starts_with("rtmp://") || url.starts_with("rtmps://")) {
        // No path segment to mask; hide everything after the scheme
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        return format!("{}{}", &url[..scheme_end], MASK);
    }
    masked.into_owned()
}

/// Scrubs a batch's secrets out of transcoder output and summary lines
#[derive(Debug, Clone)]
pub struct LogMasker {
    replacements: Vec<(String, String)>,
}

impl LogMasker {
    pub fn new(resolved_url: &str, target: &StreamTarget) -> Self {
        let mut replacements = vec![(resolved_url.to_string(), mask_url(resolved_url))];
        // Short keys are too likely to match ordinary output; the URL
        // replacement and the RTMP pattern still cover them
        if let Some(key) = target.stream_key() {
            if key.chars().count() > VISIBLE_PREFIX * 2 {
                replacements.push((key.to_string(), mask_secret(key)));
            }
        }
        replacements.retain(|(raw, _)| !raw.is_empty());
        Self { replacements }
    }

    pub fn mask(&self, line: &str) -> String {
        let mut masked = line.to_string();
        for (raw, replacement) in &self.replacements {
            if masked.contains(raw.as_str()) {
                masked = masked.replace(raw.as_str(), replacement);
            }
        }
        rtmp_url_regex()
            .replace_all(&masked, format!("${{1}}{}", MASK).as_str())
            .into_owned()
    }

    /// Masked form of the output URL for display
    pub fn masked_url(&self) -> String {
        self.replacements
            .first()
            .map(|(_, masked)| masked.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abcd-efgh-ijkl-mnop"), "abcd****");
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret(""), "****");
    }

    #[test]
    fn test_mask_url_hides_last_segment() {
        assert_eq!(
            mask_url("rtmp://a.rtmp.youtube.com/live2/abcd-efgh-ijkl"),
            "rtmp://a.rtmp.youtube.com/live2/****"
        );
        assert_eq!(mask_url("rtmp://host"), "rtmp://****");
    }

    #[test]
    fn test_masker_scrubs_key_and_url() {
        let key = "wxyz-1234-5678-abcd";
        let target = StreamTarget::StreamKey(key.to_string());
        let url = target.resolve("rtmp://a.rtmp.youtube.com/live2");
        let masker = LogMasker::new(&url, &target);

        let line = format!("Output #0, flv, to '{}':", url);
        let masked = masker.mask(&line);
        assert!(!masked.contains(key));
        assert!(!masked.contains(&url));
        assert!(masked.contains("rtmp://a.rtmp.youtube.com/live2/****"));

        let bare = masker.mask(&format!("key was {}", key));
        assert!(!bare.contains(key));
        assert_eq!(masker.masked_url(), "rtmp://a.rtmp.youtube.com/live2/****");
    }

    #[test]
    fn test_masker_scrubs_explicit_url() {
        let url = "rtmps://ingest.example.com:443/app/secret-token?auth=1";
        let target = StreamTarget::ExplicitUrl(url.to_string());
        let masker = LogMasker::new(url, &target);
        let masked = masker.mask(&format!("Opening '{}' for writing", url));
        assert!(!masked.contains(url));
        assert!(!masked.contains("secret-token"));
    }

    #[test]
    fn test_lines_without_secrets_pass_through() {
        let target = StreamTarget::StreamKey("wxyz-1234-5678-abcd".to_string());
        let masker = LogMasker::new("rtmp://a.rtmp.youtube.com/live2/wxyz-1234-5678-abcd", &target);
        assert_eq!(masker.mask("frame=  120 fps= 30"), "frame=  120 fps= 30");
    }

    #[test]
    fn test_short_key_leaves_ordinary_output_alone() {
        let target = StreamTarget::StreamKey("k".to_string());
        let url = "rtmp://a.rtmp.youtube.com/live2/k";
        let masker = LogMasker::new(url, &target);

        let progress = "frame= 1024 fps= 30 size=  1024kB time=00:00:34.13 bitrate=245.6kbits/s";
        assert_eq!(masker.mask(progress), progress);
        assert_eq!(
            masker.mask(&format!("Output #0, flv, to '{}':", url)),
            "Output #0, flv, to 'rtmp://a.rtmp.youtube.com/live2/****':"
        );
    }
}
