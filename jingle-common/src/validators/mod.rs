//! Input validation functions
//!
//! Validators for identifiers that arrive from peers. The message model uses
//! them when parsing, and the engine uses them before accepting a payload.

mod content_name;
mod file_name;
mod jid;
mod session_id;

pub use content_name::{ContentNameError, MAX_CONTENT_NAME_LENGTH, validate_content_name};
pub use file_name::{FileNameError, MAX_FILE_NAME_LENGTH, validate_file_name};
pub use jid::{JidError, MAX_JID_PART_LENGTH, validate_full_jid, validate_jid};
pub use session_id::{MAX_SESSION_ID_LENGTH, SessionIdError, validate_session_id};
