//! The per-sender door-policy state machine and pairing-code flow.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use bs_domain::{Error, Result};

use crate::store::{DoorStore, PairingChallenge, SenderStatus};

/// Characters used in pairing codes. No 0/O/1/I so codes survive being read
/// aloud or retyped from a phone screen.
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;
const CODE_TTL_MINUTES: i64 = 5;
const MAX_ACTIVE_CODES: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DoorMode {
    /// Allow everything.
    Open,
    /// Allow senders on the static list; an empty list allows everyone.
    List,
    /// The first sender becomes the sole approved one.
    Landlord,
    /// Pairing-code flow.
    #[default]
    Card,
}

/// Outcome of checking one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CheckOutcome {
    Allow,
    Deny,
    /// The message body looks like a pairing code; the gateway should call
    /// [`DoorPolicy::attempt_pairing`] with it.
    ValidateCode { code: String },
    /// Unknown sender: reply with this challenge text.
    Challenge { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PairingOutcome {
    pub success: bool,
    pub message: String,
}

pub struct DoorPolicy {
    mode: DoorMode,
    store: DoorStore,
}

impl DoorPolicy {
    pub fn new(mode: DoorMode, store: DoorStore) -> Self {
        Self { mode, store }
    }

    pub fn mode(&self) -> DoorMode {
        self.mode
    }

    /// Decide what to do with a message from `sender_id` on `platform`.
    pub fn check_message(
        &self,
        platform: &str,
        sender_id: &str,
        text: &str,
        static_allowed: Option<&[String]>,
    ) -> Result<CheckOutcome> {
        match self.mode {
            DoorMode::Open => Ok(CheckOutcome::Allow),
            DoorMode::List => {
                let allowed = static_allowed.unwrap_or(&[]);
                if allowed.is_empty() || allowed.iter().any(|s| s == sender_id) {
                    Ok(CheckOutcome::Allow)
                } else {
                    Ok(CheckOutcome::Deny)
                }
            }
            DoorMode::Landlord => match self.store.first_approved()? {
                Some(landlord) => {
                    if landlord.platform == platform && landlord.sender_id == sender_id {
                        Ok(CheckOutcome::Allow)
                    } else {
                        Ok(CheckOutcome::Deny)
                    }
                }
                None => {
                    self.store
                        .set_status(platform, sender_id, SenderStatus::Approved, true)?;
                    tracing::info!(platform, sender_id, "landlord claimed");
                    Ok(CheckOutcome::Allow)
                }
            },
            DoorMode::Card => self.check_card(platform, sender_id, text),
        }
    }

    fn check_card(&self, platform: &str, sender_id: &str, text: &str) -> Result<CheckOutcome> {
        let entry = self.store.get_entry(platform, sender_id)?;
        match entry.as_ref().map(|e| e.status) {
            Some(SenderStatus::Approved) => Ok(CheckOutcome::Allow),
            Some(SenderStatus::Blocked) => Ok(CheckOutcome::Deny),
            pending_or_unknown => {
                let candidate = text.trim().to_uppercase();
                if pending_or_unknown == Some(SenderStatus::Pending) && looks_like_code(&candidate)
                {
                    return Ok(CheckOutcome::ValidateCode { code: candidate });
                }
                self.store
                    .set_status(platform, sender_id, SenderStatus::Pending, false)?;
                Ok(CheckOutcome::Challenge {
                    message: "This assistant is private. Reply with your pairing code \
                              to connect."
                        .to_string(),
                })
            }
        }
    }

    /// Issue a new pairing code. At most three codes may be live at once.
    pub fn generate_pairing_code(&self, platform: Option<&str>) -> Result<String> {
        self.store.purge_expired_challenges()?;
        if self.store.active_challenge_count()? >= MAX_ACTIVE_CODES {
            return Err(Error::Validation(format!(
                "too many active pairing codes (max {MAX_ACTIVE_CODES})"
            )));
        }

        let mut bytes = [0u8; CODE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        let code: String = bytes
            .iter()
            .map(|b| CODE_CHARSET[(*b as usize) % CODE_CHARSET.len()] as char)
            .collect();

        let now = chrono::Utc::now();
        let expires = now + chrono::Duration::minutes(CODE_TTL_MINUTES);
        self.store.insert_challenge(&PairingChallenge {
            code: code.clone(),
            platform: platform.map(|p| p.to_string()),
            expires_at: expires.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            created_at: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        })?;
        tracing::info!(platform = platform.unwrap_or("any"), "pairing code issued");
        Ok(code)
    }

    /// Redeem a pairing code for a sender. Codes are single-use.
    pub fn attempt_pairing(
        &self,
        platform: &str,
        sender_id: &str,
        code: &str,
    ) -> Result<PairingOutcome> {
        let code = code.trim().to_uppercase();
        self.store.purge_expired_challenges()?;

        let challenge = match self.store.get_challenge(&code)? {
            Some(c) => c,
            None => {
                return Ok(PairingOutcome {
                    success: false,
                    message: "Invalid or expired pairing code.".into(),
                })
            }
        };

        if let Some(required) = &challenge.platform {
            if required != platform {
                return Ok(PairingOutcome {
                    success: false,
                    message: format!("This code is only valid on {required}."),
                });
            }
        }

        self.store
            .set_status(platform, sender_id, SenderStatus::Approved, true)?;
        self.store.delete_challenge(&code)?;
        tracing::info!(platform, sender_id, "sender paired");
        Ok(PairingOutcome {
            success: true,
            message: "Paired. You can talk to the assistant now.".into(),
        })
    }
}

/// Pairing codes as typed by users: 6-10 uppercase alphanumerics.
fn looks_like_code(candidate: &str) -> bool {
    static CODE_SHAPE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    CODE_SHAPE
        .get_or_init(|| regex::Regex::new("^[A-Z0-9]{6,10}$").expect("static pattern"))
        .is_match(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: DoorMode) -> DoorPolicy {
        DoorPolicy::new(mode, DoorStore::open_in_memory().unwrap())
    }

    #[test]
    fn open_mode_allows_everyone() {
        let p = policy(DoorMode::Open);
        assert_eq!(
            p.check_message("telegram", "anyone", "hi", None).unwrap(),
            CheckOutcome::Allow
        );
    }

    #[test]
    fn list_mode_honors_static_list() {
        let p = policy(DoorMode::List);
        let allowed = vec!["alice".to_string()];
        assert_eq!(
            p.check_message("telegram", "alice", "hi", Some(&allowed)).unwrap(),
            CheckOutcome::Allow
        );
        assert_eq!(
            p.check_message("telegram", "bob", "hi", Some(&allowed)).unwrap(),
            CheckOutcome::Deny
        );
        // Empty list allows all.
        assert_eq!(
            p.check_message("telegram", "bob", "hi", Some(&[])).unwrap(),
            CheckOutcome::Allow
        );
    }

    #[test]
    fn landlord_mode_locks_to_first_sender() {
        let p = policy(DoorMode::Landlord);
        assert_eq!(
            p.check_message("telegram", "first", "hi", None).unwrap(),
            CheckOutcome::Allow
        );
        assert_eq!(
            p.check_message("telegram", "second", "hi", None).unwrap(),
            CheckOutcome::Deny
        );
        assert_eq!(
            p.check_message("telegram", "first", "again", None).unwrap(),
            CheckOutcome::Allow
        );
        // Same id on another platform is a different sender.
        assert_eq!(
            p.check_message("discord", "first", "hi", None).unwrap(),
            CheckOutcome::Deny
        );
    }

    #[test]
    fn card_flow_end_to_end() {
        let p = policy(DoorMode::Card);

        // Unknown sender: challenged, flipped to pending.
        let outcome = p.check_message("telegram", "X", "hello", None).unwrap();
        assert!(matches!(outcome, CheckOutcome::Challenge { .. }));

        // Pending sender typing something code-shaped: validate it.
        let code = p.generate_pairing_code(None).unwrap();
        let outcome = p
            .check_message("telegram", "X", &code.to_lowercase(), None)
            .unwrap();
        assert_eq!(outcome, CheckOutcome::ValidateCode { code: code.clone() });

        // Redeem.
        let result = p.attempt_pairing("telegram", "X", &code.to_lowercase()).unwrap();
        assert!(result.success);

        // Approved now.
        assert_eq!(
            p.check_message("telegram", "X", "hello again", None).unwrap(),
            CheckOutcome::Allow
        );

        // Codes are single-use.
        let again = p.attempt_pairing("telegram", "Y", &code).unwrap();
        assert!(!again.success);
    }

    #[test]
    fn pending_sender_with_non_code_text_is_rechallenged() {
        let p = policy(DoorMode::Card);
        p.check_message("telegram", "X", "hello", None).unwrap();
        let outcome = p
            .check_message("telegram", "X", "let me in please", None)
            .unwrap();
        assert!(matches!(outcome, CheckOutcome::Challenge { .. }));
    }

    #[test]
    fn at_most_three_active_codes() {
        let p = policy(DoorMode::Card);
        for _ in 0..3 {
            p.generate_pairing_code(None).unwrap();
        }
        assert!(matches!(
            p.generate_pairing_code(None).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn platform_restricted_code_rejected_elsewhere() {
        let p = policy(DoorMode::Card);
        let code = p.generate_pairing_code(Some("telegram")).unwrap();
        let result = p.attempt_pairing("discord", "X", &code).unwrap();
        assert!(!result.success);
        // Still redeemable on the right platform.
        let result = p.attempt_pairing("telegram", "X", &code).unwrap();
        assert!(result.success);
    }

    #[test]
    fn generated_codes_use_the_unambiguous_charset() {
        let p = policy(DoorMode::Card);
        let code = p.generate_pairing_code(None).unwrap();
        assert_eq!(code.len(), 8);
        assert!(code
            .bytes()
            .all(|b| CODE_CHARSET.contains(&b)));
        for forbidden in ['0', 'O', '1', 'I'] {
            assert!(!code.contains(forbidden));
        }
    }

    #[test]
    fn code_shape_boundaries() {
        assert!(!looks_like_code("ABC12"));
        assert!(looks_like_code("ABC123"));
        assert!(looks_like_code("ABCD234567"));
        assert!(!looks_like_code("ABCD2345678"));
        assert!(!looks_like_code("abc123"));
        assert!(!looks_like_code("ABC 123"));
    }

    #[test]
    fn blocked_sender_is_denied() {
        let store = DoorStore::open_in_memory().unwrap();
        store
            .set_status("telegram", "X", SenderStatus::Blocked, false)
            .unwrap();
        let p = DoorPolicy::new(DoorMode::Card, store);
        assert_eq!(
            p.check_message("telegram", "X", "hi", None).unwrap(),
            CheckOutcome::Deny
        );
    }
}
