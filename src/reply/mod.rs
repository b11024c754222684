//! Turning raw model replies into chat bubbles.
//!
//! - `markers`: sentinel token pairs
//! - `extractor`: summary-block parsing into ordered segments
//! - `display`: bubble model
//! - `presenter`: staggered, ordered insertion into a conversation view

pub mod display;
pub mod extractor;
pub mod markers;
pub mod presenter;

pub use display::{DisplayUnit, Originator};
pub use extractor::{ParsedReply, Segment, extract_segments};
pub use markers::SentinelMarkers;
pub use presenter::{
    ConversationView, DisplaySink, STAGGER_INTERVAL, ScheduledUnit, StaggeredPresenter,
};
