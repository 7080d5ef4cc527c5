//! 参数树内存释放测试
//!
//! 用计数分配器统计当前线程的存活字节数，验证释放后不残留任何堆内存。

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use waf_engine::{Value, ValueType};

struct CountingAllocator;

thread_local! {
    static LIVE_BYTES: Cell<isize> = const { Cell::new(0) };
}

fn record(delta: isize) {
    let _ = LIVE_BYTES.try_with(|live| live.set(live.get() + delta));
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            record(layout.size() as isize);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        record(-(layout.size() as isize));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            record(new_size as isize - layout.size() as isize);
        }
        new_ptr
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

fn live_bytes() -> isize {
    LIVE_BYTES.with(|live| live.get())
}

/// 构造一棵包含所有类型的嵌套参数树
fn build_tree() -> Value {
    let mut headers = Value::map();
    headers
        .add_to_map(b"user-agent", 0, Value::from("Mozilla/5.0"))
        .unwrap();
    headers
        .add_to_map(b"x-forwarded-for\0ignored", 0, Value::from("10.0.0.1"))
        .unwrap();

    let mut tags = Value::array();
    for i in 0..32 {
        tags.add_to_array(Value::from(format!("tag-{}", i).as_str())).unwrap();
    }
    tags.add_to_array(Value::invalid()).unwrap();

    let mut root = Value::map();
    root.add_to_map(b"headers", 0, headers).unwrap();
    root.add_to_map(b"tags", 0, tags).unwrap();
    root.add_to_map(b"id", 0, Value::int(-42)).unwrap();
    root.add_to_map(b"size", 0, Value::uint(u64::MAX)).unwrap();
    root.add_to_map(b"raw", 0, Value::string_with_length(b"a\0b\0c", 5)).unwrap();
    root
}

#[test]
fn test_deep_free_releases_everything() {
    let baseline = live_bytes();

    let mut tree = build_tree();
    assert!(live_bytes() > baseline);
    assert_eq!(tree.get(b"headers").map(|h| h.len()), Some(2));
    assert!(tree.get(b"headers").unwrap().get(b"x-forwarded-for").is_some());

    tree.free(true);
    assert_eq!(tree.value_type(), ValueType::Invalid);
    assert_eq!(live_bytes(), baseline);

    // 对无效值再次释放是空操作
    tree.free(true);
    assert_eq!(live_bytes(), baseline);
}

#[test]
fn test_shallow_free_after_moving_children() {
    let baseline = live_bytes();

    let mut wrapper = Value::array();
    wrapper.add_to_array(build_tree()).unwrap();

    // 子节点被移入另一个容器后，只释放外层包装
    let mut target = Value::map();
    if let Value::Array(items) = &mut wrapper {
        for child in items.drain(..) {
            target.add_to_map(b"moved", 0, child).unwrap();
        }
    }
    wrapper.free(false);
    assert_eq!(wrapper.value_type(), ValueType::Array);
    assert!(wrapper.is_empty());

    assert_eq!(target.len(), 1);
    target.free(true);
    wrapper.free(true);
    assert_eq!(live_bytes(), baseline);
}

#[test]
fn test_rejected_child_is_returned_intact() {
    let baseline = live_bytes();

    let mut map = Value::map();
    let mut list = Value::array();

    let named = list
        .add_child(Some(b"name".as_slice()), Value::from("child"))
        .unwrap_err();
    assert_eq!(named.child, Value::from("child"));
    assert!(list.is_empty());

    let unnamed = map.add_to_array(Value::int(1)).unwrap_err();
    assert_eq!(unnamed.child, Value::int(1));
    assert!(map.is_empty());

    drop(named);
    drop(unnamed);
    map.free(true);
    list.free(true);
    assert_eq!(live_bytes(), baseline);
}
