use vheap::HeapManager;

fn log_alloc(addr: std::ptr::NonNull<u8>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let mut heap = HeapManager::new(4096, 64 * 1024);

    let a = heap.allocate(8);
    log_alloc(a, 8);

    let b = heap.allocate(200);
    log_alloc(b, 200);

    // Too big for the committed prefix, more pages get committed.
    let c = heap.allocate(10_000);
    log_alloc(c, 10_000);

    unsafe { c.as_ptr().write_bytes(0x7F, 10_000) };

    println!("{:#?}", heap.stats());

    heap.free(a);
    heap.free(c);

    println!("Still allocated: {}", heap.report_live_allocations());
    println!("{:#?}", heap.stats());

    heap.free(b);
}
