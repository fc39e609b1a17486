//! Checkout tokens: the per-booking bearer capability that lets whoever
//! scans the room's QR code release the booking without logging in.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// 256 bits from the OS CSPRNG.
const TOKEN_BYTES: usize = 32;

/// Mint a fresh, unguessable, URL-safe token.
pub fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds the public delete-by-token URL that the QR code encodes.
#[derive(Debug, Clone)]
pub struct CheckoutLinks {
    base_url: String,
}

impl CheckoutLinks {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn url_for(&self, token: &str) -> String {
        format!("{}/api/bookings/delete/{token}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_url_safe_and_long() {
        let token = mint_token();
        // 32 bytes → 43 base64 chars without padding
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..1000).map(|_| mint_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn checkout_url_strips_trailing_slash() {
        let links = CheckoutLinks::new("https://rooms.example.org/");
        assert_eq!(
            links.url_for("abc"),
            "https://rooms.example.org/api/bookings/delete/abc"
        );
    }
}
