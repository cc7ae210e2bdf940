pub mod coroutine;
pub mod demod;
pub mod error;
pub mod modulator;
pub mod packet;
pub mod sample_stream;

pub mod diagnostics;

pub use demod::Demod;
pub use diagnostics::Diagnostics;
pub use error::OokError;
pub use modulator::Mod;
pub use packet::Packet;
