#![doc = include_str!("../README.md")]

pub mod capture;

pub use capture::clock::{current_thread_id, now};
pub use capture::profiler::{
    define_counter_track, define_stack, emit_counter_value_double, emit_counter_value_int,
    emit_zone_category, emit_zone_dynamic_name, emit_zone_end, emit_zone_flow,
    emit_zone_flow_terminate, emit_zone_param_bool, emit_zone_param_double, emit_zone_param_int,
    emit_zone_param_str, emit_zone_param_uint, emit_zone_start, set_thread_name,
};
pub use capture::{
    global, stop, CaptureReader, CaptureSink, FileSink, NullSink, Packet, Profiler,
    SharedVecSink, SourceLocation, StaticStr, Zone,
};
