pub mod encoder;
pub mod fanout;

pub use encoder::{CaptureEncoder, EncoderStats};
pub use fanout::{Fanout, FanoutClient};
