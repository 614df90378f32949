//! EME wide-block cipher mode (ECB-Mix-ECB) over AES-256.
//!
//! Length-preserving and tweakable: encrypting the same padded name under
//! the same key and tweak always yields the same bytes, which is what makes
//! name lookups on the remote possible without a directory index. Operates
//! on whole 16-byte blocks, 1 to 128 of them.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

pub(crate) const BLOCK: usize = 16;
pub(crate) const MAX_BLOCKS: usize = 128;
/// Largest input the transform accepts, in bytes.
pub(crate) const MAX_INPUT: usize = BLOCK * MAX_BLOCKS;

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

pub(crate) struct Eme {
    cipher: Aes256,
}

impl Eme {
    pub(crate) fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256::new(key.into()),
        }
    }

    pub(crate) fn encrypt(&self, tweak: &[u8; BLOCK], data: &[u8]) -> Vec<u8> {
        self.transform(tweak, data, Direction::Encrypt)
    }

    pub(crate) fn decrypt(&self, tweak: &[u8; BLOCK], data: &[u8]) -> Vec<u8> {
        self.transform(tweak, data, Direction::Decrypt)
    }

    fn aes(&self, direction: Direction, block: &mut [u8; BLOCK]) {
        let ga = GenericArray::from_mut_slice(block);
        match direction {
            Direction::Encrypt => self.cipher.encrypt_block(ga),
            Direction::Decrypt => self.cipher.decrypt_block(ga),
        }
    }

    /// The L table is always derived with AES in the encrypt direction,
    /// regardless of which way the transform runs.
    fn tabulate_l(&self, m: usize) -> Vec<[u8; BLOCK]> {
        let mut li = [0u8; BLOCK];
        self.aes(Direction::Encrypt, &mut li);

        let mut table = Vec::with_capacity(m);
        for _ in 0..m {
            mult_by_two(&mut li);
            table.push(li);
        }
        table
    }

    fn transform(&self, tweak: &[u8; BLOCK], data: &[u8], direction: Direction) -> Vec<u8> {
        assert!(
            !data.is_empty() && data.len() % BLOCK == 0 && data.len() <= MAX_INPUT,
            "EME input must be 1..=128 whole blocks"
        );
        let m = data.len() / BLOCK;
        let l_table = self.tabulate_l(m);

        // PPP_j = AES(P_j xor L_j)
        let mut ppp = vec![[0u8; BLOCK]; m];
        for j in 0..m {
            let mut block = [0u8; BLOCK];
            block.copy_from_slice(&data[j * BLOCK..(j + 1) * BLOCK]);
            xor_into(&mut block, &l_table[j]);
            self.aes(direction, &mut block);
            ppp[j] = block;
        }

        // MP = T xor PPP_1 xor ... xor PPP_m; MC = AES(MP); M = MP xor MC
        let mut mp = ppp[0];
        xor_into(&mut mp, tweak);
        for block in ppp.iter().skip(1) {
            xor_into(&mut mp, block);
        }
        let mut mc = mp;
        self.aes(direction, &mut mc);
        let mut mask = mp;
        xor_into(&mut mask, &mc);

        // CCC_j = PPP_j xor 2^(j-1) * M for j > 0
        let mut ccc = vec![[0u8; BLOCK]; m];
        for j in 1..m {
            mult_by_two(&mut mask);
            ccc[j] = ppp[j];
            xor_into(&mut ccc[j], &mask);
        }

        // CCC_0 = MC xor T xor CCC_1 xor ... xor CCC_m
        let mut first = mc;
        xor_into(&mut first, tweak);
        for block in ccc.iter().skip(1) {
            xor_into(&mut first, block);
        }
        ccc[0] = first;

        // C_j = AES(CCC_j) xor L_j
        let mut out = vec![0u8; data.len()];
        for j in 0..m {
            let mut block = ccc[j];
            self.aes(direction, &mut block);
            xor_into(&mut block, &l_table[j]);
            out[j * BLOCK..(j + 1) * BLOCK].copy_from_slice(&block);
        }
        out
    }
}

/// Multiply by x in GF(2^128), little-endian bit order within bytes.
fn mult_by_two(block: &mut [u8; BLOCK]) {
    let mut out = [0u8; BLOCK];
    out[0] = block[0].wrapping_mul(2);
    if block[15] >= 128 {
        out[0] ^= 135;
    }
    for j in 1..BLOCK {
        out[j] = block[j].wrapping_mul(2);
        if block[j - 1] >= 128 {
            out[j] = out[j].wrapping_add(1);
        }
    }
    *block = out;
}

fn xor_into(out: &mut [u8; BLOCK], other: &[u8; BLOCK]) {
    for (o, b) in out.iter_mut().zip(other) {
        *o ^= b;
    }
}
