//! Internet checksum helpers.
//!
//! The synthesized UDP checksum must match the standard IPv6 pseudo-header
//! algorithm bit-for-bit so real IP stacks on the host side accept the
//! reconstructed datagrams.

/// One's-complement sum of 16-bit big-endian words.
fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// TCP/UDP/ICMPv6 checksum over the IPv6 pseudo-header.
///
/// `payload` is the transport header plus data, with its checksum field
/// zeroed. Returns the value to store, in host order.
pub fn tcp_udp_v6_checksum(src: &[u8; 16], dst: &[u8; 16], protocol: u8, payload: &[u8]) -> u16 {
    let mut sum = 0u32;
    sum = sum_words(src, sum);
    sum = sum_words(dst, sum);
    sum += payload.len() as u32;
    sum += u32::from(protocol);
    sum = sum_words(payload, sum);

    let check = fold(sum);
    // A computed zero is transmitted as all-ones for UDP
    if check == 0 {
        0xffff
    } else {
        check
    }
}

/// Verify a received transport checksum; a stored value of the checksum
/// field must be included in `payload` as transmitted.
pub fn verify_v6_checksum(src: &[u8; 16], dst: &[u8; 16], protocol: u8, payload: &[u8]) -> bool {
    let mut sum = 0u32;
    sum = sum_words(src, sum);
    sum = sum_words(dst, sum);
    sum += payload.len() as u32;
    sum += u32::from(protocol);
    sum = sum_words(payload, sum);
    fold(sum) == 0
}
