//! 命令执行请求与结果模型

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

/// 执行命令请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CommandRequest {
    #[validate(length(min = 1, max = 16384))]
    pub command: String,
}

/// 命令输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// 一次连接/执行的结果
///
/// `success` 只表示会话建立成功且命令（如有）运行结束，与退出码无关。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(rename = "result")]
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CommandOutput>,
}

impl CommandResult {
    /// 仅连接探测成功
    pub fn connected() -> Self {
        Self {
            success: true,
            message: "connection succeeded".to_string(),
            output: None,
        }
    }

    /// 命令运行结束（任意退出码）
    pub fn executed(output: CommandOutput) -> Self {
        Self {
            success: true,
            message: "command executed".to_string(),
            output: Some(output),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            output: None,
        }
    }

    pub fn connect_failed(error: &AppError) -> Self {
        Self::failure(format!("connection failed: {}", error))
    }

    pub fn execution_failed(error: &AppError) -> Self {
        Self::failure(format!("command failed: {}", error))
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.output.as_ref().map(|o| o.code)
    }
}
