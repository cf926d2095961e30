//! Account record types, the colon-delimited line codec, and error definitions.
//!
//! Foundation crate -- no I/O.

pub mod error;
pub mod record;
pub mod types;

pub use error::{AcctError, AcctResult};
pub use record::{RecordFormatError, RecordKind};
pub use types::{
    AccountFile, AccountFiles, Decision, EntityKind, Gid, GroupAliasPair, GroupOutcome,
    GroupRecord, Members, ShadowEntry, Uid, UserOutcome, UserRecord, MISSING_CREDENTIAL,
    REGULAR_UID_MIN,
};
