//! Audio capture, pre-roll ring buffer, frame queue, and pipeline state.

pub mod capture;
pub mod frame_queue;
pub mod ring_buffer;
pub mod state;

pub use capture::start_capture;
pub use frame_queue::{AudioFrame, FrameQueue};
pub use ring_buffer::RingBuffer;
pub use state::{PipelineState, PipelineStateMachine};
