use crate::growers::{ArenaGrower, GrowError};

use self::format::init_logging;

use super::*;


const ALL_STRATEGIES: [FitStrategy; 4] = [
    FitStrategy::FirstFit,
    FitStrategy::BestFit,
    FitStrategy::WorstFit,
    FitStrategy::NextFit,
];

/// Views a word buffer as an 8-byte aligned byte arena.
fn arena(words: &mut [u64]) -> ArenaGrower<'_> {
    let bytes = unsafe {
        core::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), words.len() * 8)
    };
    ArenaGrower::new(bytes)
}

fn new_heap(strategy: FitStrategy, words: &mut [u64]) -> Heap<ArenaGrower<'_>> {
    init_logging();
    unsafe { Heap::with_grower(Config::new(strategy), arena(words)) }
}

fn snapshot<G: Grower>(heap: &Heap<G>) -> Vec<(usize, usize, bool)> {
    heap.blocks().map(|b| (b.offset, b.size, b.free)).collect()
}

/// Checks the block list and counter invariants that must hold between operations.
fn check_invariants<G: Grower>(heap: &Heap<G>) {
    let h = heap.config().header_size();
    let align = heap.config().alignment();
    let blocks: Vec<BlockInfo> = heap.blocks().collect();

    for block in &blocks {
        assert_eq!(block.size % align, 0, "{block:?} should be aligned");
        assert_ne!(block.size, 0);
    }
    for pair in blocks.windows(2) {
        let data_end = pair[0].offset + h + pair[0].size;
        assert!(data_end <= pair[1].offset, "{pair:?} should be sorted and disjoint");
        if data_end == pair[1].offset {
            assert!(!(pair[0].free && pair[1].free), "{pair:?} should have been merged");
        }
    }

    let stats = heap.statistics();
    assert_eq!(stats.blocks, blocks.len());
    assert!(stats.mallocs >= stats.reuses);
}

#[test]
fn test_zero_size() {
    for strategy in ALL_STRATEGIES {
        let mut words = [0_u64; 64];
        let mut heap = new_heap(strategy, &mut words);
        assert!(heap.allocate(0).is_null());
        assert_eq!(heap.statistics(), Statistics::default());
        assert_eq!(heap.blocks().count(), 0);
    }
}

#[test]
fn test_alignment() {
    for strategy in ALL_STRATEGIES {
        let mut words = vec![0_u64; 4096];
        let mut heap = new_heap(strategy, &mut words);
        let mut objects = vec![];
        for size in 1..64 {
            let p = heap.allocate(size);
            assert!(!p.is_null());
            assert_eq!(p as usize % 4, 0);
            assert!(unsafe { heap.usable_size(NonNull::new(p).unwrap()) } >= size);
            objects.push(p);
        }
        for p in objects.into_iter().step_by(2) {
            unsafe { heap.deallocate(p) };
        }
        for size in (1..64).rev() {
            let p = heap.allocate(size);
            assert_eq!(p as usize % 4, 0);
        }
        check_invariants(&heap);
    }
}

#[test]
fn test_larger_alignment() {
    init_logging();
    let mut words = vec![0_u64; 2048];
    let config = Config::new(FitStrategy::BestFit).with_alignment(32);
    let mut heap = unsafe { Heap::with_grower(config, arena(&mut words)) };
    for size in 1..40 {
        let p = heap.allocate(size);
        assert_eq!(p as usize % 32, 0);
        assert_eq!(unsafe { heap.usable_size(NonNull::new(p).unwrap()) } % 32, 0);
        if size % 3 == 0 {
            unsafe { heap.deallocate(p) };
        }
    }
    check_invariants(&heap);
}

#[test]
fn test_reuse() {
    for strategy in [FitStrategy::FirstFit, FitStrategy::BestFit, FitStrategy::WorstFit] {
        let mut words = [0_u64; 64];
        let mut heap = new_heap(strategy, &mut words);
        let p1 = heap.allocate(16);
        assert!(!p1.is_null());
        unsafe { heap.deallocate(p1) };
        let p2 = heap.allocate(8);
        assert_eq!(p1, p2);

        let stats = heap.statistics();
        assert_eq!(stats.reuses, 1);
        assert_eq!(stats.grows, 1);
        assert_eq!(stats.mallocs, 2);
        assert_eq!(stats.requested, 24);
        check_invariants(&heap);
    }
}

#[test]
fn test_split() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let h = heap.config().header_size();

    let p1 = heap.allocate(128);
    let _guard = heap.allocate(8);
    unsafe { heap.deallocate(p1) };
    let p2 = heap.allocate(16);
    assert_eq!(p1, p2);

    assert_eq!(
        snapshot(&heap),
        vec![(0, 16, false), (h + 16, 128 - 16 - h, true), (h + 128, 8, false)]
    );
    let stats = heap.statistics();
    assert_eq!(stats.splits, 1);
    assert_eq!(stats.blocks, 3);
    assert_eq!(stats.max_heap, 136);
    check_invariants(&heap);

    // The residual block serves the next request.
    let p3 = heap.allocate(128 - 16 - h);
    assert_eq!(p3, unsafe { p1.add(16 + h) });
    assert_eq!(heap.statistics().grows, 2);
}

#[test]
fn test_no_split_small_remainder() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let h = heap.config().header_size();

    let p1 = heap.allocate(16 + h);
    let _guard = heap.allocate(8);
    unsafe { heap.deallocate(p1) };
    let p2 = heap.allocate(16);
    assert_eq!(p1, p2);
    assert_eq!(unsafe { heap.usable_size(NonNull::new(p2).unwrap()) }, 16 + h);
    assert_eq!(heap.statistics().splits, 0);
    check_invariants(&heap);
}

#[test]
fn test_coalesce() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let h = heap.config().header_size();

    let p1 = heap.allocate(16);
    let p2 = heap.allocate(16);
    unsafe {
        heap.deallocate(p1);
        heap.deallocate(p2);
    }
    assert_eq!(snapshot(&heap), vec![(0, 32 + h, true)]);
    let stats = heap.statistics();
    assert_eq!(stats.coalesces, 1);
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.grows, 2);

    let p3 = heap.allocate(32 + h);
    assert_eq!(p3, p1);
    assert_eq!(heap.statistics().grows, 2);
    check_invariants(&heap);
}

#[test]
fn test_coalesce_both_sides() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let h = heap.config().header_size();

    let a = heap.allocate(16);
    let b = heap.allocate(16);
    let c = heap.allocate(16);
    let _guard = heap.allocate(16);
    unsafe {
        heap.deallocate(a);
        heap.deallocate(c);
        assert_eq!(heap.statistics().coalesces, 0);
        heap.deallocate(b);
    }
    assert_eq!(
        snapshot(&heap),
        vec![(0, 48 + 2 * h, true), (48 + 3 * h, 16, false)]
    );
    assert_eq!(heap.statistics().coalesces, 2);
    check_invariants(&heap);
}

#[test]
fn test_coalesce_forward() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let h = heap.config().header_size();

    let a = heap.allocate(16);
    let b = heap.allocate(24);
    let _guard = heap.allocate(4);
    unsafe {
        heap.deallocate(b);
        heap.deallocate(a);
    }
    assert_eq!(
        snapshot(&heap),
        vec![(0, 40 + h, true), (40 + 2 * h, 4, false)]
    );
    assert_eq!(heap.statistics().coalesces, 1);
    check_invariants(&heap);
}

#[test]
fn test_in_use_blocks_are_not_merged() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);

    let a = heap.allocate(16);
    let _b = heap.allocate(16);
    let c = heap.allocate(16);
    unsafe {
        heap.deallocate(a);
        heap.deallocate(c);
    }
    assert_eq!(heap.statistics().coalesces, 0);
    assert_eq!(heap.blocks().filter(|b| b.free).count(), 2);
    check_invariants(&heap);
}

/// A grower that leaves a gap before every region it hands out.
struct GappyGrower<'a>(ArenaGrower<'a>);

unsafe impl Grower for GappyGrower<'_> {
    unsafe fn grow(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, GrowError> {
        self.0.grow(16, align)?;
        self.0.grow(size, align)
    }
}

#[test]
fn test_gaps_are_not_merged() {
    init_logging();
    let mut words = [0_u64; 128];
    let grower = GappyGrower(arena(&mut words));
    let mut heap = unsafe { Heap::with_grower(Config::default(), grower) };

    let a = heap.allocate(16);
    let b = heap.allocate(16);
    unsafe {
        heap.deallocate(a);
        heap.deallocate(b);
    }
    assert_eq!(heap.statistics().coalesces, 0);
    assert_eq!(heap.blocks().count(), 2);
    check_invariants(&heap);
}

/// Leaves one free block per entry of `sizes`, each followed by an occupied guard.
/// Returns the data pointers of the free blocks.
fn free_blocks<G: Grower>(heap: &mut Heap<G>, sizes: &[usize]) -> Vec<*mut u8> {
    let mut free = vec![];
    for &size in sizes {
        free.push(heap.allocate(size));
        heap.allocate(4);
    }
    for &p in &free {
        unsafe { heap.deallocate(p) };
    }
    free
}

#[test]
fn test_first_fit_selection() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let free = free_blocks(&mut heap, &[40, 10, 25]);
    assert_eq!(heap.allocate(8), free[0]);
    assert_eq!(heap.allocate(8), free[1]);
    check_invariants(&heap);
}

#[test]
fn test_best_fit_selection() {
    for (sizes, smallest) in [([40, 10, 25], 1), ([25, 40, 10], 2), ([10, 25, 40], 0)] {
        let mut words = [0_u64; 128];
        let mut heap = new_heap(FitStrategy::BestFit, &mut words);
        let free = free_blocks(&mut heap, &sizes);
        let grows = heap.statistics().grows;

        assert_eq!(heap.allocate(8), free[smallest]);
        assert_eq!(heap.statistics().grows, grows);
        assert_eq!(heap.statistics().reuses, 1);
        check_invariants(&heap);
    }
}

#[test]
fn test_worst_fit_selection() {
    for (sizes, largest) in [([40, 10, 25], 0), ([25, 40, 10], 1), ([10, 25, 40], 2)] {
        let mut words = [0_u64; 128];
        let mut heap = new_heap(FitStrategy::WorstFit, &mut words);
        let free = free_blocks(&mut heap, &sizes);

        assert_eq!(heap.allocate(8), free[largest]);
        assert_eq!(heap.statistics().reuses, 1);
        check_invariants(&heap);
    }
}

#[test]
fn test_next_fit_persistence() {
    let mut words = [0_u64; 256];
    let mut heap = new_heap(FitStrategy::NextFit, &mut words);
    let free = free_blocks(&mut heap, &[16, 16, 16]);
    let (a, b, c) = (free[0], free[1], free[2]);

    // No cursor yet: first fit.
    assert_eq!(heap.allocate(16), a);
    assert_eq!(heap.allocate(16), b);

    // `a` is free again but lies before the cursor.
    unsafe { heap.deallocate(a) };
    assert_eq!(heap.allocate(16), c);

    // Only `a` is left, reachable by wrapping around once.
    assert_eq!(heap.allocate(16), a);

    // Nothing fits anywhere: the search terminates and the heap grows.
    let grows = heap.statistics().grows;
    let p = heap.allocate(16);
    assert!(!p.is_null());
    assert!(![a, b, c].contains(&p));
    assert_eq!(heap.statistics().grows, grows + 1);
    check_invariants(&heap);
}

#[test]
fn test_first_fit_rescans_from_head() {
    let mut words = [0_u64; 256];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let free = free_blocks(&mut heap, &[16, 16, 16]);

    assert_eq!(heap.allocate(16), free[0]);
    assert_eq!(heap.allocate(16), free[1]);
    unsafe { heap.deallocate(free[0]) };
    assert_eq!(heap.allocate(16), free[0]);
}

#[test]
fn test_next_fit_tail() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::NextFit, &mut words);

    let a = heap.allocate(16);
    let _guard = heap.allocate(4);
    let t = heap.allocate(16);
    unsafe {
        heap.deallocate(a);
        heap.deallocate(t);
    }
    assert_eq!(heap.allocate(16), a);
    // The tail is returned, so the cursor goes back to the head.
    assert_eq!(heap.allocate(16), t);
    unsafe { heap.deallocate(a) };
    assert_eq!(heap.allocate(16), a);
    assert_eq!(heap.statistics().grows, 3);
    check_invariants(&heap);
}

#[test]
fn test_next_fit_cursor_absorbed() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::NextFit, &mut words);
    let h = heap.config().header_size();

    let x = heap.allocate(16);
    let y = heap.allocate(16);
    let _guard = heap.allocate(4);
    unsafe { heap.deallocate(x) };
    // Leaves the cursor on `y`.
    assert_eq!(heap.allocate(16), x);

    unsafe {
        heap.deallocate(x);
        heap.deallocate(y);
    }
    assert_eq!(snapshot(&heap)[0], (0, 32 + h, true));

    assert_eq!(heap.allocate(16), x);
    assert_eq!(heap.statistics().splits, 1);
    check_invariants(&heap);
}

#[test]
fn test_out_of_memory() {
    for strategy in ALL_STRATEGIES {
        let mut words = [0_u64; 64];
        let mut heap = new_heap(strategy, &mut words);

        assert!(heap.allocate(1024).is_null());
        assert_eq!(heap.statistics(), Statistics::default());

        assert!(!heap.allocate(400).is_null());
        assert!(heap.allocate(200).is_null());
        let stats = heap.statistics();
        assert_eq!(stats.mallocs, 1);
        assert_eq!(stats.grows, 1);
        assert_eq!(stats.requested, 400);
        assert!(heap.allocate(usize::MAX).is_null());
        check_invariants(&heap);
    }
}

#[test]
#[should_panic(expected = "already free")]
fn test_double_free() {
    let mut words = [0_u64; 64];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let p = heap.allocate(16);
    unsafe {
        heap.deallocate(p);
        heap.deallocate(p);
    }
}

#[test]
fn test_try_deallocate_double_free() {
    let mut words = [0_u64; 64];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let p = heap.allocate(16);
    unsafe {
        assert_eq!(heap.try_deallocate(p), Ok(()));
        assert_eq!(
            heap.try_deallocate(p),
            Err(HeapError::InvalidFree { offset: 0 })
        );
    }
    assert_eq!(heap.statistics().frees, 1);
    check_invariants(&heap);
}

#[test]
fn test_null_deallocate() {
    let mut words = [0_u64; 64];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    unsafe { heap.deallocate(null_mut()) };
    assert_eq!(heap.statistics(), Statistics::default());
}

fn fill_pattern(p: *mut u8, len: usize) {
    for i in 0..len {
        unsafe { p.add(i).write(i as u8 ^ 0x5A) };
    }
}

fn has_pattern(p: *const u8, len: usize) -> bool {
    (0..len).all(|i| unsafe { *p.add(i) } == i as u8 ^ 0x5A)
}

#[test]
fn test_realloc_grow() {
    for strategy in ALL_STRATEGIES {
        let mut words = [0_u64; 128];
        let mut heap = new_heap(strategy, &mut words);

        let p = heap.allocate(16);
        fill_pattern(p, 16);
        let q = unsafe { heap.reallocate(p, 64) };
        assert!(!q.is_null());
        assert_ne!(p, q);
        assert!(has_pattern(q, 16));

        let stats = heap.statistics();
        assert_eq!(stats.mallocs, 2);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.requested, 80);
        check_invariants(&heap);
    }
}

#[test]
fn test_realloc_shrink() {
    let mut words = [0_u64; 128];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);

    let p = heap.allocate(64);
    fill_pattern(p, 64);
    let q = unsafe { heap.reallocate(p, 8) };
    assert!(!q.is_null());
    assert!(has_pattern(q, 8));
    check_invariants(&heap);
}

#[test]
fn test_realloc_null_and_zero() {
    let mut words = [0_u64; 64];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    unsafe {
        let p = heap.reallocate(null_mut(), 24);
        assert!(!p.is_null());
        assert_eq!(heap.statistics().mallocs, 1);

        assert!(heap.reallocate(p, 0).is_null());
        assert_eq!(heap.statistics().frees, 1);
        assert!(heap.blocks().all(|b| b.free));

        assert!(heap.reallocate(null_mut(), 0).is_null());
        assert_eq!(heap.statistics().mallocs, 1);
    }
}

#[test]
fn test_realloc_out_of_memory() {
    let mut words = [0_u64; 64];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);

    let p = heap.allocate(100);
    fill_pattern(p, 100);
    let q = unsafe { heap.reallocate(p, 10_000) };
    assert!(q.is_null());
    assert!(has_pattern(p, 100));
    assert_eq!(heap.statistics().frees, 0);
    assert!(heap.blocks().all(|b| !b.free));
}

#[test]
#[should_panic(expected = "already free")]
fn test_realloc_free_block() {
    let mut words = [0_u64; 64];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);
    let p = heap.allocate(16);
    let _guard = heap.allocate(16);
    unsafe {
        heap.deallocate(p);
        heap.reallocate(p, 32);
    }
}

#[test]
fn test_allocate_zeroed() {
    let mut words = [0_u64; 64];
    let mut heap = new_heap(FitStrategy::FirstFit, &mut words);

    let p = heap.allocate(32);
    unsafe {
        p.write_bytes(0xFF, 32);
        heap.deallocate(p);
    }
    let q = heap.allocate_zeroed(4, 8);
    assert_eq!(p, q);
    assert!((0..32).all(|i| unsafe { *q.add(i) } == 0));

    assert!(heap.allocate_zeroed(usize::MAX, 2).is_null());
    assert!(heap.allocate_zeroed(0, 8).is_null());
    assert!(heap.allocate_zeroed(8, 0).is_null());

    let stats = heap.statistics();
    assert_eq!(stats.mallocs, 2);
    assert_eq!(stats.requested, 64);
}

#[test]
fn test_counters() {
    for strategy in ALL_STRATEGIES {
        let mut words = vec![0_u64; 1024];
        let mut heap = new_heap(strategy, &mut words);
        let mut requested = 0;
        let mut live = vec![];

        for round in 0..6 {
            for size in [3, 17, 64, 5, 120, 33] {
                let size = size + round;
                let p = heap.allocate(size);
                assert!(!p.is_null());
                requested += size;
                live.push(p);
            }
            // Free every other live object, oldest first.
            let mut i = 0;
            live.retain(|&p| {
                i += 1;
                if i % 2 == 0 {
                    unsafe { heap.deallocate(p) };
                    false
                } else {
                    true
                }
            });
            check_invariants(&heap);
        }

        let stats = heap.statistics();
        assert_eq!(stats.requested, requested);
        assert_eq!(stats.mallocs, 36);
        assert_eq!(stats.mallocs, stats.reuses + stats.grows);
        assert!(stats.reuses > 0);
        assert_eq!(stats.blocks, heap.blocks().count());
    }
}
