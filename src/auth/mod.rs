/// Authentication module
///
/// Credential verification, token signing, refresh-token family rotation
/// with reuse detection, and access-token revocation.

mod authority;
mod claims;
mod clock;
mod credentials;
mod family;
mod jwt;
mod password;
mod rotation;

pub use authority::{
    require_role, LoginResult, Registration, SessionPolicy, SweepReport, TokenAuthority, TokenPair,
};
pub use claims::{AccessClaims, RefreshClaims, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::CredentialVerifier;
pub use family::{Presented, PreviousToken, TokenFamily};
pub use jwt::{IssuedToken, TokenCodec};
pub use password::{hash_password, verify_password};
pub use rotation::{RotationEngine, RotationOutcome};
