//! 稳定内容哈希
//!
//! 节点、关系、期望与分支的 id 都由内容决定，同样的声明在任何进程里得到同样的 id。

use sha2::{Digest, Sha256};

/// 对若干片段做 SHA-256，取前 12 字节的十六进制作为 id
pub fn content_hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update([0x1f]);
    }
    hasher
        .finalize()
        .iter()
        .take(12)
        .map(|b| format!("{b:02x}"))
        .collect()
}
