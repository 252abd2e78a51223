// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_m2m::{
    transaction::{advance, chunk_size, offset_for, Transaction},
    Error,
};

const FRAME_BYTES: usize = 640 * 240 * 2;

#[test]
fn test_chunk_arithmetic() {
    assert_eq!(chunk_size(FRAME_BYTES, 1), FRAME_BYTES);
    assert_eq!(chunk_size(FRAME_BYTES, 4), 76800);
    assert_eq!(offset_for(0, 76800), 0);
    assert_eq!(offset_for(3, 76800), 230400);

    assert_eq!(advance(0, 1), (0, true));
    assert_eq!(advance(0, 4), (1, false));
    assert_eq!(advance(2, 4), (3, false));
    assert_eq!(advance(3, 4), (0, true));
}

#[test]
fn test_cursor_cycle() -> Result<(), Error> {
    let mut transaction = Transaction::new(FRAME_BYTES, 4)?;
    assert_eq!(transaction.chunk_size(), 76800);

    let mut cursors = Vec::new();
    let mut completed = Vec::new();
    for _ in 0..8 {
        cursors.push(transaction.cursor());
        completed.push(transaction.advance());
    }
    assert_eq!(cursors, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    assert_eq!(
        completed,
        vec![false, false, false, true, false, false, false, true]
    );

    transaction.advance();
    transaction.reset();
    assert_eq!(transaction.cursor(), 0);
    Ok(())
}

#[test]
fn test_single_buffer_completes_every_time() -> Result<(), Error> {
    let mut transaction = Transaction::new(FRAME_BYTES, 1)?;
    for _ in 0..3 {
        assert!(transaction.advance());
        assert_eq!(transaction.cursor(), 0);
    }
    assert_eq!(transaction.chunk_range(0), 0..FRAME_BYTES);
    Ok(())
}

#[test]
fn test_chunk_ranges_cover_frame() -> Result<(), Error> {
    let transaction = Transaction::new(FRAME_BYTES, 8)?;
    let mut next = 0;
    for k in 0..8 {
        let range = transaction.chunk_range(k);
        assert_eq!(range.start, next);
        assert_eq!(range.len(), transaction.chunk_size());
        next = range.end;
    }
    assert_eq!(next, FRAME_BYTES);

    // Indices past the transaction wrap around, as OUTPUT prefill does.
    assert_eq!(transaction.chunk_range(9), transaction.chunk_range(1));
    Ok(())
}

#[test]
fn test_every_divisor_tiles_frame() {
    let mut divisors = 0;
    for translen in 1..=FRAME_BYTES as u32 {
        // Chunks must split evenly into whole 16-bit pixels.
        let even = FRAME_BYTES % (2 * translen as usize) == 0;
        assert_eq!(Transaction::new(FRAME_BYTES, translen).is_ok(), even);
        if !even {
            continue;
        }
        let size = chunk_size(FRAME_BYTES, translen);
        assert_eq!(size * translen as usize, FRAME_BYTES);
        assert_eq!(offset_for(translen - 1, size) + size, FRAME_BYTES);
        divisors += 1;
    }
    // 640 * 240 * 2 = 2^12 * 3 * 5^2
    assert_eq!(divisors, 72);
}

#[test]
fn test_rejects_uneven_split() {
    for (frame_bytes, translen) in [(FRAME_BYTES, 0), (0, 1), (FRAME_BYTES, 7), (6, 2)] {
        let result = Transaction::new(frame_bytes, translen);
        assert!(
            matches!(result, Err(Error::InvalidTransaction { .. })),
            "{} bytes / {} accepted",
            frame_bytes,
            translen
        );
    }
}
