//! Utility functions for the live relay
//!
//! - `masking` scrubs stream keys and RTMP URLs out of anything a human sees
//! - `time` handles session identifiers and stored timestamps

pub mod masking;
pub mod time;

pub use masking::{mask_secret, mask_url, LogMasker};
pub use time::{format_datetime, generate_session_id, parse_datetime};
