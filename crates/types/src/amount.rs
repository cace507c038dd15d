//! Wei-denominated amounts.

use num_bigint::BigUint;

/// An amount of wei. Arbitrary precision so ether-scale values never overflow.
pub type Wei = BigUint;

const GWEI: u64 = 1_000_000_000;
const ETHER_IN_GWEI: u64 = 1_000_000_000;

/// `n` wei.
pub fn wei(n: u64) -> Wei {
    BigUint::from(n)
}

/// `n` gwei expressed in wei.
pub fn gwei(n: u64) -> Wei {
    BigUint::from(n) * GWEI
}

/// `n` ether expressed in wei.
pub fn ether(n: u64) -> Wei {
    gwei(n) * ETHER_IN_GWEI
}

/// `n` thousandths of an ether expressed in wei; `milliether(200)` is 0.2 ether.
pub fn milliether(n: u64) -> Wei {
    gwei(n) * (ETHER_IN_GWEI / 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(wei(7), BigUint::from(7u32));
        assert_eq!(gwei(4_000), BigUint::from(4_000_000_000_000u64));
        assert_eq!(ether(1), BigUint::from(10u64.pow(18)));
        assert_eq!(ether(1_000), BigUint::from(10u64.pow(18)) * 1_000u32);
        assert_eq!(milliether(1_000), ether(1));
        assert_eq!(milliether(100), BigUint::from(10u64.pow(17)));
    }
}
