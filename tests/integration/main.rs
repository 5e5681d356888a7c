//! Integration tests driving the controller against a scripted HID backend

mod common;
mod hotplug_tests;
mod protocol_tests;
mod runtime_tests;
