//! 任务参数编解码
//!
//! 队列只存储不透明的字节，这里约定用JSON表示结构化参数。

use jobqueue_core::SchedulerResult;
use serde::{de::DeserializeOwned, Serialize};

pub fn encode_args<T: Serialize + ?Sized>(args: &T) -> SchedulerResult<Vec<u8>> {
    Ok(serde_json::to_vec(args)?)
}

pub fn decode_args<T: DeserializeOwned>(bytes: &[u8]) -> SchedulerResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}
