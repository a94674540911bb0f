use rand::Rng;
use rand::distributions::Alphanumeric;

/// 默认请求 ID 长度
pub const DEFAULT_REQUEST_ID_LENGTH: usize = 12;

/// 生成指定长度的随机请求 ID（字母和数字）
pub fn gen_request_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_length_and_charset() {
        let id = gen_request_id(DEFAULT_REQUEST_ID_LENGTH);
        assert_eq!(id.len(), DEFAULT_REQUEST_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(gen_request_id(32), gen_request_id(32));
    }
}
