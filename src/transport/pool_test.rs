use super::BufPool;

#[test]
fn test_pool_reuses_buffers() {
    let pool = BufPool::new();
    let mut buf = pool.get(1024);
    buf.extend_from_slice(b"request bytes");
    let cap = buf.capacity();
    pool.put(buf);

    let buf = pool.get(1024);
    assert_eq!(buf.capacity(), cap);
    assert!(buf.is_empty(), "pooled buffers come back cleared");
}

#[test]
fn test_pool_oversized_requests_allocate() {
    let pool = BufPool::new();
    let buf = pool.get(1024 * 1024);
    assert!(buf.capacity() >= 1024 * 1024);
    // Oversized buffers go back to the allocator, not the queue.
    pool.put(buf);
    let buf = pool.get(64);
    assert!(buf.capacity() >= 64);
}
