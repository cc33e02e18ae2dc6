//! `dawn-playback` — alarm sound output with an escalating volume ramp.
//!
//! [`PlaybackController`] is the only code that touches the [`AudioOutput`]
//! port. It takes the output resource, loops the alarm sound (falling back to
//! the default sound once), and drives a [`VolumeRamp`] from the initial level
//! up to the maximum. Focus arbitration arrives as [`OutputEvent`]s:
//!
//! | Event                         | Reaction                             |
//! |-------------------------------|--------------------------------------|
//! | `FocusLoss`                   | stop, release everything             |
//! | `FocusLossTransient`          | pause stream and ramp, keep resource |
//! | `FocusLossTransientCanDuck`   | halve level, ramp untouched          |
//! | `FocusGain`                   | resume from the current level        |
//! | `PlaybackError`               | stop                                 |

pub mod controller;
pub mod error;
pub mod output;
pub mod ramp;

#[cfg(test)]
mod testing;

pub use controller::{EndReason, PlayReport, PlaybackController, PlaybackEvent, PlaybackState, SessionId};
pub use error::{PlaybackError, Result};
pub use output::{
    AudioOutput, AudioUsage, OutputEvent, PlayableStream, PlaybackHandle, SourceResolver,
    StreamConfig,
};
pub use ramp::{next_level, RampSettings, VolumeRamp};
