//! Domain models for the field-operations client.

mod activity_report;
mod checkpoint;
mod checkpoint_verification;
mod location_record;
mod patrol_location;
mod photo;
mod time_record;
mod user;

pub use activity_report::ActivityReport;
pub use checkpoint::Checkpoint;
pub use checkpoint_verification::CheckpointVerification;
pub use location_record::LocationRecord;
pub use patrol_location::PatrolLocation;
pub use photo::Photo;
pub use time_record::{TimeRecord, TimeRecordType};
pub use user::User;
