use std::sync::Arc;

mod common;

use common::{formatted_disk, mount, read_file, reboot, write_file};
use xv6_fs::consts::fs::{BSIZE, LOGSIZE, ROOTDEV};
use xv6_fs::driver::RamDisk;
use xv6_fs::fs::dir_name;
use xv6_fs::{mkfs, File, FileSystem, FsError, InodeType, MkfsParams, OpenFlags};

fn mkdir(fs: &FileSystem, path: &str) {
    fs.begin_op();
    fs.mkdir(path, None).unwrap();
    fs.end_op();
}

fn nlink(fs: &FileSystem, path: &str) -> u16 {
    let inode = fs.namei(path, None).unwrap();
    let idata = inode.lock().unwrap();
    idata.nlink()
}

#[test]
fn nested_path_matches_chained_lookups() {
    let fs = mount(formatted_disk());
    mkdir(&fs, "/a");
    mkdir(&fs, "/a/b");
    write_file(&fs, "/a/b/c", b"leaf");

    let by_path = fs.namei("/a/b/c", None).unwrap();

    let mut cur = fs.root().unwrap();
    for part in ["a", "b", "c"] {
        let mut idata = cur.lock().unwrap();
        let (next, _) = idata.dir_lookup(&dir_name(part.as_bytes())).unwrap().unwrap();
        drop(idata);
        cur = next;
    }
    assert_eq!(cur.inum(), by_path.inum());

    // 多余的斜杠不影响解析
    assert_eq!(fs.namei("//a///b/c/", None).unwrap().inum(), by_path.inum());
    assert_eq!(fs.namei("/a/./b/../b/c", None).unwrap().inum(), by_path.inum());
}

#[test]
fn paths_without_components_are_not_found() {
    let fs = mount(formatted_disk());
    assert_eq!(fs.namei("", None).unwrap_err(), FsError::NotFound);
    assert_eq!(fs.namei("///", None).unwrap_err(), FsError::NotFound);
    assert_eq!(fs.namei_parent("/", None).unwrap_err(), FsError::NotFound);
}

#[test]
fn root_is_its_own_parent() {
    let fs = mount(formatted_disk());
    let root = fs.root().unwrap();
    assert_eq!(fs.namei("/..", None).unwrap().inum(), root.inum());
    assert_eq!(fs.namei("/.", None).unwrap().inum(), root.inum());
}

#[test]
fn relative_paths_start_at_cwd() {
    let fs = mount(formatted_disk());
    mkdir(&fs, "/home");
    write_file(&fs, "/home/notes", b"hello");
    write_file(&fs, "/notes", b"other");

    let home = fs.namei("/home", None).unwrap();
    let rel = fs.namei("notes", Some(&home)).unwrap();
    assert_eq!(rel.inum(), fs.namei("/home/notes", None).unwrap().inum());

    // 绝对路径忽略 cwd，没有 cwd 时相对路径从根目录开始
    let abs = fs.namei("/notes", Some(&home)).unwrap();
    assert_ne!(abs.inum(), rel.inum());
    assert_eq!(fs.namei("notes", None).unwrap().inum(), abs.inum());
    assert_eq!(fs.namei("..", Some(&home)).unwrap().inum(), fs.root().unwrap().inum());
}

#[test]
fn file_in_the_middle_is_not_a_directory() {
    let fs = mount(formatted_disk());
    write_file(&fs, "/f", b"data");
    assert_eq!(fs.namei("/f/x", None).unwrap_err(), FsError::NotDirectory);
    assert_eq!(fs.namei("/missing/x", None).unwrap_err(), FsError::NotFound);
}

#[test]
fn parent_lookup_stops_before_last_component() {
    let fs = mount(formatted_disk());
    mkdir(&fs, "/d");

    let (parent, name) = fs.namei_parent("/d/new", None).unwrap();
    assert_eq!(parent.inum(), fs.namei("/d", None).unwrap().inum());
    assert_eq!(name, dir_name(b"new"));

    // 最后一个分量不必存在，也不必是目录
    let (parent, name) = fs.namei_parent("/d", None).unwrap();
    assert_eq!(parent.inum(), fs.root().unwrap().inum());
    assert_eq!(name, dir_name(b"d"));
}

#[test]
fn long_names_are_truncated() {
    let fs = mount(formatted_disk());
    write_file(&fs, "/abcdefghijklmnopq", b"x");
    assert_eq!(read_file(&fs, "/abcdefghijklmn").unwrap(), b"x");
    assert_eq!(read_file(&fs, "/abcdefghijklmnzzz").unwrap(), b"x");
}

#[test]
fn mkdir_links_parent_and_self() {
    let fs = mount(formatted_disk());
    let before = nlink(&fs, "/");
    mkdir(&fs, "/d");
    assert_eq!(nlink(&fs, "/"), before + 1);
    assert_eq!(nlink(&fs, "/d"), 1);

    let d = fs.namei("/d", None).unwrap();
    let mut idata = d.lock().unwrap();
    assert_eq!(idata.get_itype(), InodeType::Directory);
    assert!(idata.dir_is_empty().unwrap());
    let (dot, _) = idata.dir_lookup(&dir_name(b".")).unwrap().unwrap();
    let (dotdot, _) = idata.dir_lookup(&dir_name(b"..")).unwrap().unwrap();
    drop(idata);
    assert_eq!(dot.inum(), d.inum());
    assert_eq!(dotdot.inum(), fs.root().unwrap().inum());
    drop((dot, dotdot, d));

    fs.begin_op();
    assert_eq!(fs.mkdir("/d", None).unwrap_err(), FsError::AlreadyExists);
    fs.end_op();
}

#[test]
fn unlink_refuses_dots_and_non_empty_dirs() {
    let fs = mount(formatted_disk());
    mkdir(&fs, "/d");
    write_file(&fs, "/d/f", b"keep");

    fs.begin_op();
    assert_eq!(fs.unlink("/d/.", None).unwrap_err(), FsError::InvalidName);
    assert_eq!(fs.unlink("/d/..", None).unwrap_err(), FsError::InvalidName);
    assert_eq!(fs.unlink("/d", None).unwrap_err(), FsError::NotEmpty);
    assert_eq!(fs.unlink("/d/none", None).unwrap_err(), FsError::NotFound);
    fs.end_op();

    assert_eq!(read_file(&fs, "/d/f").unwrap(), b"keep");
}

#[test]
fn unlinked_entry_disappears_but_dir_keeps_size() {
    let disk = formatted_disk();
    let fs = mount(disk.clone());
    mkdir(&fs, "/d");
    write_file(&fs, "/d/f", b"gone soon");
    let dir_size = fs.namei("/d", None).unwrap().lock().unwrap().size();
    let root_links = nlink(&fs, "/");

    fs.begin_op();
    fs.unlink("/d/f", None).unwrap();
    fs.end_op();
    assert_eq!(fs.namei("/d/f", None).unwrap_err(), FsError::NotFound);
    assert_eq!(fs.namei("/d", None).unwrap().lock().unwrap().size(), dir_size);

    // 目录清空后可以删除，父目录少一个链接
    fs.begin_op();
    fs.unlink("/d", None).unwrap();
    fs.end_op();
    assert_eq!(nlink(&fs, "/"), root_links - 1);
    drop(fs);

    let (_disk, fs) = reboot(disk.snapshot());
    assert_eq!(fs.namei("/d", None).unwrap_err(), FsError::NotFound);
}

#[test]
fn freed_inode_is_reused() {
    let fs = mount(formatted_disk());
    write_file(&fs, "/x", b"123");
    let inum = fs.namei("/x", None).unwrap().inum();

    fs.begin_op();
    fs.unlink("/x", None).unwrap();
    fs.end_op();

    fs.begin_op();
    let y = fs.ialloc(ROOTDEV, InodeType::File).unwrap();
    assert_eq!(y.inum(), inum);
    let idata = y.lock().unwrap();
    assert_eq!(idata.size(), 0);
    assert_eq!(idata.nlink(), 0);
    drop(idata);
    drop(y);
    fs.end_op();
}

#[test]
fn link_adds_a_second_name() {
    let disk = formatted_disk();
    let fs = mount(disk.clone());
    write_file(&fs, "/orig", b"shared");

    fs.begin_op();
    fs.link("/orig", "/alias", None).unwrap();
    fs.end_op();
    assert_eq!(nlink(&fs, "/orig"), 2);
    assert_eq!(fs.namei("/alias", None).unwrap().inum(), fs.namei("/orig", None).unwrap().inum());

    // 删除一个名字后内容仍在
    fs.begin_op();
    fs.unlink("/orig", None).unwrap();
    fs.end_op();
    drop(fs);
    let (_disk, fs) = reboot(disk.snapshot());
    assert_eq!(read_file(&fs, "/alias").unwrap(), b"shared");
    assert_eq!(nlink(&fs, "/alias"), 1);
}

#[test]
fn link_failures_roll_back() {
    let fs = mount(formatted_disk());
    mkdir(&fs, "/d");
    write_file(&fs, "/f", b"1");
    write_file(&fs, "/g", b"2");

    fs.begin_op();
    assert_eq!(fs.link("/d", "/d2", None).unwrap_err(), FsError::IsDirectory);
    assert_eq!(fs.link("/f", "/g", None).unwrap_err(), FsError::AlreadyExists);
    assert_eq!(fs.link("/f", "/none/f", None).unwrap_err(), FsError::NotFound);
    assert_eq!(fs.link("/missing", "/m", None).unwrap_err(), FsError::NotFound);
    fs.end_op();

    assert_eq!(nlink(&fs, "/f"), 1);
    assert_eq!(read_file(&fs, "/g").unwrap(), b"2");
    assert_eq!(fs.namei("/d2", None).unwrap_err(), FsError::NotFound);
}

#[test]
fn mkdir_on_full_disk_leaves_nothing_behind() {
    let disk = Arc::new(RamDisk::new(100));
    let params = MkfsParams { size: 100, ninodes: 16, nlog: LOGSIZE as u32 };
    mkfs(disk.as_ref(), &params).unwrap();
    let fs = mount(disk);

    // 写满所有数据块
    let file = File::open(&fs, "/big", None, OpenFlags::CREATE | OpenFlags::WRONLY).unwrap();
    let data = vec![1; 100 * BSIZE];
    assert!(file.write(&data).unwrap() < data.len());
    drop(file);
    let big = fs.namei("/big", None).unwrap().inum();
    let root_links = nlink(&fs, "/");

    fs.begin_op();
    assert_eq!(fs.mkdir("/d", None).unwrap_err(), FsError::NoSpace);
    fs.end_op();
    assert_eq!(fs.namei("/d", None).unwrap_err(), FsError::NotFound);
    assert_eq!(nlink(&fs, "/"), root_links);

    // 失败的目录分到的 inode 已经归还
    fs.begin_op();
    let next = fs.ialloc(ROOTDEV, InodeType::File).unwrap();
    assert_eq!(next.inum(), big + 1);
    drop(next);
    fs.end_op();

    // 不需要数据块的设备文件仍可创建
    fs.begin_op();
    fs.mknod("/null", None, 3, 0).unwrap();
    fs.end_op();
    assert_eq!(nlink(&fs, "/null"), 1);
}
