pub mod argfile;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod demux;
pub mod encoder;
pub mod error;
pub mod interrupt;
pub mod invocation;
pub mod logging;
pub mod paths;
pub mod report;
pub mod runner;
pub mod slices;
pub mod supervisor;
pub mod timecode;
pub mod trial;
