use chrono::Utc;
use rand::{distr::Alphanumeric, Rng};

const SUFFIX_LEN: usize = 10;

/// Mints an opaque session token: microsecond timestamp plus a random suffix.
pub fn mint_session_token() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{}", Utc::now().timestamp_micros(), suffix)
}

/// Token under which a completed session is preserved when its original
/// record could not be updated.
pub fn completion_variant(token: &str) -> String {
    format!("{}-completed-{}", token, Utc::now().timestamp_millis())
}

/// True for path segments shaped like a minted token (`<digits>-<alnum>...`).
pub fn looks_like_session_token(segment: &str) -> bool {
    let Some((timestamp, rest)) = segment.split_once('-') else {
        return false;
    };
    timestamp.len() >= 13
        && timestamp.chars().all(|c| c.is_ascii_digit())
        && !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn minted_tokens_are_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| mint_session_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn minted_tokens_are_recognised() {
        let token = mint_session_token();
        assert!(looks_like_session_token(&token));
        assert!(looks_like_session_token(&completion_variant(&token)));
        assert!(!looks_like_session_token("complete"));
        assert!(!looks_like_session_token("12-ab"));
    }
}
