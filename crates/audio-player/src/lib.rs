pub mod config;
pub mod coordinator;
pub mod decode;
pub mod device;
pub mod playback;
pub mod queue;
pub mod reader;
pub mod resample;
pub mod sink;
pub mod status;

pub use config::PlayerConfig;
pub use coordinator::{PlaybackCoordinator, TrackOpener, rewind_target};
pub use decode::{Decoder, DecoderFactory, SymphoniaFactory};
pub use sink::{AudioSink, CpalSink};
pub use status::StatusCell;
