//! System calls as a user program sees them.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use corvid_hal::{VirtAddr, PHYS_BASE};
use corvid_userspace::Syscall;
use spin::Mutex;

/// Run `name` to completion and return its exit code
fn run(kernel: &Kernel, name: &str) -> i32 {
    let tid = kernel.processes.execute(name).unwrap();
    kernel.processes.wait(tid)
}

fn recorder<T>() -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<T>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    (log.clone(), log)
}

#[test]
fn test_null_and_unknown_calls() {
    let kernel = boot();
    let (seen, out) = recorder();
    kernel.install("caller", move |user| {
        out.lock().push(user.syscall(&[99, 1, 2]));
        out.lock().push(null(user, 41));
        out.lock().push(null(user, u32::MAX));
        exit(user, 0)
    });

    assert_eq!(run(&kernel, "caller"), 0);
    assert_eq!(seen.lock()[1..], [42u32, 0]);
    assert_eq!(kernel.syscalls.unknown_count(), 1);
    assert_eq!(kernel.syscalls.get_count(Syscall::Null), 2);
    assert_eq!(kernel.console(), "caller: exit(0)\n");
}

#[test]
fn test_halt_powers_off() {
    let kernel = boot();
    kernel.install("shutdown", |user| {
        halt(user);
        exit(user, 0)
    });

    assert!(!kernel.platform.is_powered_off());
    assert_eq!(run(&kernel, "shutdown"), 0);
    assert!(kernel.platform.is_powered_off());
}

#[test]
fn test_console_write_and_read() {
    let kernel = boot();
    kernel.platform.push_input(b"hi!");
    let (seen, out) = recorder();
    kernel.install("echo", move |user| {
        let (count, data) = read(user, 0, 3);
        out.lock().push((count, data.clone()));
        let written = write(user, 1, &data);
        out.lock().push((written, Vec::new()));
        out.lock().push((write(user, 0, b"x"), Vec::new()));
        out.lock().push((read(user, 1, 1).0, Vec::new()));
        exit(user, 0)
    });

    assert_eq!(run(&kernel, "echo"), 0);
    assert_eq!(
        *seen.lock(),
        [(3, b"hi!".to_vec()), (3, Vec::new()), (-1, Vec::new()), (-1, Vec::new())]
    );
    assert_eq!(kernel.console(), "hi!echo: exit(0)\n");
}

#[test]
fn test_descriptor_numbering() {
    let kernel = boot();
    kernel.fs.insert("a", b"alpha");
    let (seen, out) = recorder();
    kernel.install("fds", move |user| {
        let first = open(user, "a");
        let second = open(user, "a");
        close(user, first);
        let third = open(user, "a");
        let missing = open(user, "b");
        out.lock().extend([first, second, third, missing]);
        exit(user, 0)
    });

    assert_eq!(run(&kernel, "fds"), 0);
    assert_eq!(*seen.lock(), [2, 3, 4, -1]);
}

#[test]
fn test_file_operations() {
    let kernel = boot();
    let (seen, out) = recorder();
    kernel.install("files", move |user| {
        let mut log = Vec::new();
        log.push(create(user, "notes", 10) as i32);
        log.push(create(user, "notes", 10) as i32);
        log.push(create(user, "", 1) as i32);
        log.push(create(user, "much-too-long-name", 1) as i32);

        let fd = open(user, "notes");
        log.push(write(user, fd, b"abc"));
        log.push(filesize(user, fd));
        log.push(tell(user, fd));
        seek(user, fd, 0);
        let (count, data) = read(user, fd, 3);
        log.push(count);
        log.push(i32::from(data == b"abc"));
        seek(user, fd, 100);
        log.push(read(user, fd, 4).0);
        log.push(write(user, fd, b"zz"));
        close(user, fd);

        log.push(remove(user, "notes") as i32);
        log.push(remove(user, "notes") as i32);
        *out.lock() = log;
        exit(user, 0)
    });

    assert_eq!(run(&kernel, "files"), 0);
    assert_eq!(*seen.lock(), [1, 0, 0, 0, 3, 10, 3, 3, 1, 0, 0, 1, 0]);
    assert!(!kernel.fs.exists("notes"));
}

#[test]
fn test_bad_descriptors() {
    let kernel = boot();
    let (seen, out) = recorder();
    kernel.install("strays", move |user| {
        let mut log = vec![
            filesize(user, 5),
            tell(user, 5),
            read(user, 5, 4).0,
            write(user, 5, b"data"),
        ];
        seek(user, 5, 10);
        close(user, 5);
        close(user, 0);
        log.push(null(user, 0) as i32);
        *out.lock() = log;
        exit(user, 0)
    });

    assert_eq!(run(&kernel, "strays"), 0);
    assert_eq!(*seen.lock(), [-1, -1, -1, -1, 1]);
}

#[test]
fn test_closed_descriptor_is_gone() {
    let kernel = boot();
    kernel.fs.insert("a", b"alpha");
    let (seen, out) = recorder();
    kernel.install("reuse", move |user| {
        let fd = open(user, "a");
        close(user, fd);
        out.lock().push(filesize(user, fd));
        out.lock().push(read(user, fd, 1).0);
        exit(user, 0)
    });

    assert_eq!(run(&kernel, "reuse"), 0);
    assert_eq!(*seen.lock(), [-1, -1]);
}

#[test]
fn test_bad_pointers_kill_only_the_caller() {
    let kernel = boot();
    let survived = Arc::new(Mutex::new(Vec::new()));
    let programs: [(&str, fn(&mut corvid_hal::host::UserContext<'_>)); 5] = [
        ("kernel-str", |user| {
            user.syscall(&[Syscall::Open as u32, PHYS_BASE as u32]);
        }),
        ("null-str", |user| {
            user.syscall(&[Syscall::Create as u32, 0, 16]);
        }),
        ("wild-buf", |user| {
            user.syscall(&[Syscall::Write as u32, 1, 0x1000, 4]);
        }),
        ("edge-buf", |user| {
            user.syscall(&[Syscall::Read as u32, 0, (PHYS_BASE - 2) as u32, 4]);
        }),
        ("wild-esp", |user| {
            user.trap(VirtAddr::new(0x2000));
        }),
    ];
    for (name, program) in programs {
        let out = survived.clone();
        kernel.install(name, move |user| {
            program(user);
            out.lock().push(name);
            exit(user, 0)
        });
    }

    for (name, _) in programs {
        assert_eq!(run(&kernel, name), -1, "{} should have been killed", name);
    }
    assert!(survived.lock().is_empty());
    assert_eq!(
        kernel.processes.stats().user_faults.load(Ordering::Relaxed),
        programs.len() as u64
    );

    // The kernel carries on.
    kernel.install("after", |user| exit(user, 5));
    assert_eq!(run(&kernel, "after"), 5);
    assert!(kernel.console().ends_with("wild-esp: exit(-1)\nafter: exit(5)\n"));
    assert_eq!(kernel.platform.memory().live_spaces(), 0);
}

#[test]
fn test_exit_status_from_frame() {
    let kernel = boot();
    kernel.install("neg", |user| exit(user, -7));
    assert_eq!(run(&kernel, "neg"), -7);
    assert_eq!(kernel.console(), "neg: exit(-7)\n");
    assert_eq!(kernel.syscalls.get_count(Syscall::Exit), 1);
}
