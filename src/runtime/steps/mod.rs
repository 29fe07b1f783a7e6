/// Built-in step executors, one module per step kind

pub mod api_call;
pub mod calculation;
pub mod conditional;
pub mod database;
pub mod notification;
pub mod parallel;
pub mod trigger;
pub mod validation;
pub mod wait;
