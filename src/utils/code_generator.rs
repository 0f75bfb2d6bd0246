use crate::models::CODE_LENGTH;
use rand::Rng;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 生成兑换码 (大写字母+数字, 固定长度)。
/// 唯一性由写入时的 insert-if-absent 保证, 冲突时重新生成。
pub fn generate_redeem_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
