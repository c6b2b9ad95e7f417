//! Signal propagation across the relaunch boundary.

pub mod forwarder;

pub use forwarder::{
    forward, is_forwarded, is_job_control_stop, ForwardStats, ForwarderHandle, OsDelivery,
    SignalDelivery, SignalForwarder, SignalQueue, FORWARDED_SIGNALS, LIGHTWEIGHT_QUEUE_CAPACITY,
    ORCHESTRATED_QUEUE_CAPACITY,
};
