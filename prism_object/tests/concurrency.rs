//! Concurrent access to shapes and shared objects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use prism_object::{DynamicObject, ObjectType, PropertyKey, Shape, ShapeBuilder, Value};

fn root(name: &str) -> Arc<Shape> {
    ShapeBuilder::new()
        .object_type(ObjectType::new(name))
        .build()
        .expect("root shape")
}

fn key(name: &str) -> PropertyKey {
    PropertyKey::name(name)
}

#[test]
fn test_shared_object_concurrent_writes() {
    let object = Arc::new(DynamicObject::new(&root("SharedWrites")).unwrap());
    object.set_shape_flags(0x0f).unwrap();
    object.mark_shared().unwrap();

    let barrier = Arc::new(Barrier::new(3));
    let done = Arc::new(AtomicBool::new(false));
    let writers: Vec<_> = [Value::Int(1), Value::string("two")]
        .into_iter()
        .map(|value| {
            let object = Arc::clone(&object);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..500 {
                    object.put(&key("x"), value.clone()).unwrap();
                }
            })
        })
        .collect();

    let observer = {
        let object = Arc::clone(&object);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            barrier.wait();
            while !done.load(Ordering::Acquire) {
                assert!(object.is_shared());
                assert_eq!(object.shape_flags(), 0x0f);
                if let Some(value) = object.get(&key("x")) {
                    assert!(value == Value::Int(1) || value == Value::string("two"));
                }
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    observer.join().unwrap();

    let value = object.get(&key("x")).unwrap();
    assert!(value == Value::Int(1) || value == Value::string("two"));
    assert!(object.is_shared());
    assert_eq!(object.shape_flags(), 0x0f);
}

#[test]
fn test_shared_object_no_torn_reads() {
    const THREADS: usize = 4;
    const PROPERTIES: usize = 6;

    let object = Arc::new(DynamicObject::new(&root("NoTear")).unwrap());
    object.mark_shared().unwrap();
    for p in 0..PROPERTIES {
        object
            .put(&PropertyKey::from(format!("p{}", p)), Value::Long(p as i64))
            .unwrap();
    }

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let object = Arc::clone(&object);
            thread::spawn(move || {
                for round in 0..200 {
                    let p = (t + round) % PROPERTIES;
                    let name = PropertyKey::from(format!("p{}", p));
                    let value = if round % 3 == 0 {
                        Value::string("s")
                    } else {
                        Value::Long((p * 1000 + round) as i64)
                    };
                    object.put(&name, value).unwrap();

                    for q in 0..PROPERTIES {
                        let read = object.get(&PropertyKey::from(format!("p{}", q))).unwrap();
                        let valid = match read {
                            Value::Long(v) => v as usize % 1000 == q || v as usize / 1000 == q,
                            Value::Str(_) => true,
                            _ => false,
                        };
                        assert!(valid, "p{} read {:?}", q, read);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(object.key_array().len(), PROPERTIES);
}

#[test]
fn test_racing_transitions_converge() {
    const THREADS: usize = 8;

    let root = root("Race");
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let root = Arc::clone(&root);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let object = DynamicObject::new(&root).unwrap();
                barrier.wait();
                for name in ["a", "b", "c", "d"] {
                    object.put(&key(name), Value::Int(1)).unwrap();
                }
                object
            })
        })
        .collect();

    let objects: Vec<DynamicObject> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let first = objects[0].shape();
    assert!(objects.iter().all(|o| Arc::ptr_eq(&o.shape(), &first)));
}

#[test]
fn test_concurrent_generalization_keeps_values() {
    const THREADS: usize = 6;

    let root = root("ConcurrentWiden");
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let root = Arc::clone(&root);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let object = DynamicObject::new(&root).unwrap();
                object.put(&key("n"), Value::Int(t as i32)).unwrap();
                object.put(&key("m"), Value::Int(-(t as i32))).unwrap();
                barrier.wait();
                if t % 2 == 0 {
                    object.put(&key("n"), Value::Double(t as f64 + 0.5)).unwrap();
                } else {
                    object.put(&key("n"), Value::string("s")).unwrap();
                }
                object
            })
        })
        .collect();

    for (t, handle) in handles.into_iter().enumerate() {
        let object = handle.join().unwrap();
        let expected = if t % 2 == 0 {
            Value::Double(t as f64 + 0.5)
        } else {
            Value::string("s")
        };
        assert_eq!(object.get(&key("n")), Some(expected));
        assert_eq!(object.get(&key("m")), Some(Value::Int(-(t as i32))));
        assert!(object.shape().is_valid());
    }
}

#[test]
fn test_concurrent_puts_lose_no_keys() {
    const THREADS: usize = 4;
    const KEYS: usize = 16;

    let object = Arc::new(DynamicObject::new(&root("ConcurrentKeys")).unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let object = Arc::clone(&object);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..KEYS {
                    let name = format!("t{t}_{i}");
                    object.put(&key(&name), Value::Int((t * KEYS + i) as i32)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(object.key_array().len(), THREADS * KEYS);
    for t in 0..THREADS {
        for i in 0..KEYS {
            let name = format!("t{t}_{i}");
            assert_eq!(object.get(&key(&name)), Some(Value::Int((t * KEYS + i) as i32)));
        }
    }
}
