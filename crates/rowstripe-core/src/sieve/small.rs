//! Sequential sieves: the small-prime set and the reference count.

/// Integer square root: the largest `r` with `r * r <= n`.
pub fn isqrt(n: u64) -> u64 {
    let mut r = (n as f64).sqrt() as u64;
    while r.checked_mul(r).map_or(true, |sq| sq > n) {
        r -= 1;
    }
    while (r + 1).checked_mul(r + 1).is_some_and(|sq| sq <= n) {
        r += 1;
    }
    r
}

/// Odd primes in `[3, isqrt(max_num)]`, ascending.
///
/// Every worker can call this independently and obtain the same sequence,
/// which is all the local sieve needs to strike composites anywhere in
/// `[2, max_num]`. The sieve runs over odd values only: slot `i` stands for
/// `2i + 3`.
pub fn small_primes(max_num: u64) -> Vec<u64> {
    let limit = isqrt(max_num);
    if limit < 3 {
        return Vec::new();
    }

    let len = ((limit - 1) / 2) as usize;
    let mut marked = vec![false; len];
    let mut primes = Vec::new();

    for i in 0..len {
        if marked[i] {
            continue;
        }
        let p = 2 * i + 3;
        primes.push(p as u64);
        let mut j = (p * p - 3) / 2;
        while j < len {
            marked[j] = true;
            j += p;
        }
    }
    primes
}

/// Number of primes in `[2, max_num]` by a plain full-array sieve.
///
/// Shares no code with the distributed path; tests and
/// `--verify` compare against it.
pub fn sequential_prime_count(max_num: u64) -> u64 {
    if max_num < 2 {
        return 0;
    }
    let n = max_num as usize;
    let mut composite = vec![false; n + 1];
    let mut i = 2;
    while i * i <= n {
        if !composite[i] {
            let mut j = i * i;
            while j <= n {
                composite[j] = true;
                j += i;
            }
        }
        i += 1;
    }
    composite[2..].iter().filter(|&&c| !c).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(8), 2);
        assert_eq!(isqrt(9), 3);
        assert_eq!(isqrt(99), 9);
        assert_eq!(isqrt(100), 10);
        assert_eq!(isqrt(u64::MAX), u32::MAX as u64);
    }

    #[test]
    fn test_small_primes_of_100() {
        assert_eq!(small_primes(100), vec![3, 5, 7]);
        assert_eq!(small_primes(121), vec![3, 5, 7, 11]);
        assert!(small_primes(8).is_empty());
    }

    #[test]
    fn test_small_primes_are_prime() {
        let primes = small_primes(1_000_000);
        assert_eq!(primes.len(), 167); // 168 primes below 1000, minus 2
        assert_eq!(*primes.last().unwrap(), 997);
    }

    #[test]
    fn test_sequential_counts() {
        assert_eq!(sequential_prime_count(0), 0);
        assert_eq!(sequential_prime_count(1), 0);
        assert_eq!(sequential_prime_count(2), 1);
        assert_eq!(sequential_prime_count(100), 25);
        assert_eq!(sequential_prime_count(10_000), 1229);
    }
}
