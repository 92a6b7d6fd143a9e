// Models module - Roster entities and wire records

pub mod attendance_event;
pub mod child;
pub mod scope;

pub use attendance_event::AttendanceEvent;
pub use child::{AttendanceStatus, Child, EnrollmentStatus};
pub use scope::Scope;
