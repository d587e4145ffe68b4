pub mod ask;
pub mod calibrate;
pub mod onboard;
pub mod serve;
