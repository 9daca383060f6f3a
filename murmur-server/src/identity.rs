use serde::{Deserialize, Serialize};

/// Identity a client declares when it registers.
///
/// The auth layer in front of the relay has already verified it; the relay
/// stores it unchanged for the lifetime of the connection session. The public
/// key is opaque key material peers use to encrypt for this user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: String,
    pub public_key: String,
}
