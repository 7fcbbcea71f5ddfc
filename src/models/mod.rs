//! 数据模型模块

pub mod command;
pub mod profile;

pub use command::{CommandOutput, CommandRequest, CommandResult};
pub use profile::{
    KeyLocator, KeyUpload, NewServerProfile, ProfileSummary, RegisterProfileRequest, ServerProfile,
};
