pub mod booking_token;
pub mod candidate;
pub mod candidate_round;
pub mod evaluation;
pub mod interviewer;
pub mod notification;
pub mod round;
