// Services module - Attendance logic and realtime fan-out

pub mod child_locks;
pub mod engine;
pub mod relay;
pub mod roster;
pub mod transition;
