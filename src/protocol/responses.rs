//! Pre-allocated RESP responses for zero-allocation common replies.

/// Static OK response: +OK\r\n
pub static OK: &[u8] = b"+OK\r\n";

/// Static PONG response: +PONG\r\n
pub static PONG: &[u8] = b"+PONG\r\n";

/// Static QUEUED response (for transactions): +QUEUED\r\n
pub static QUEUED: &[u8] = b"+QUEUED\r\n";

/// Static NULL bulk string: $-1\r\n
pub static NULL_BULK: &[u8] = b"$-1\r\n";

/// Static NULL array: *-1\r\n
pub static NULL_ARRAY: &[u8] = b"*-1\r\n";

/// Static empty bulk string: $0\r\n\r\n
pub static EMPTY_BULK: &[u8] = b"$0\r\n\r\n";

/// Static empty array: *0\r\n
pub static EMPTY_ARRAY: &[u8] = b"*0\r\n";

/// Pre-computed small integer responses (0-31).
static SMALL_INTEGERS: [&[u8]; 32] = [
    b":0\r\n", b":1\r\n", b":2\r\n", b":3\r\n", b":4\r\n", b":5\r\n", b":6\r\n", b":7\r\n",
    b":8\r\n", b":9\r\n", b":10\r\n", b":11\r\n", b":12\r\n", b":13\r\n", b":14\r\n", b":15\r\n",
    b":16\r\n", b":17\r\n", b":18\r\n", b":19\r\n", b":20\r\n", b":21\r\n", b":22\r\n", b":23\r\n",
    b":24\r\n", b":25\r\n", b":26\r\n", b":27\r\n", b":28\r\n", b":29\r\n", b":30\r\n", b":31\r\n",
];

/// Look up a pre-computed integer response, if one exists for `n`.
#[inline]
pub fn integer(n: i64) -> Option<&'static [u8]> {
    match n {
        0..=31 => Some(SMALL_INTEGERS[n as usize]),
        -1 => Some(b":-1\r\n"),
        -2 => Some(b":-2\r\n"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_integers() {
        assert_eq!(integer(0), Some(b":0\r\n" as &[u8]));
        assert_eq!(integer(31), Some(b":31\r\n" as &[u8]));
        assert_eq!(integer(-2), Some(b":-2\r\n" as &[u8]));
        assert_eq!(integer(32), None);
        assert_eq!(integer(-3), None);
    }
}
