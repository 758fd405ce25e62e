use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use block_dev::RamDisk;
use sector_fs::layout::{Bitmap, FileHeader, IndirectBlock, MAX_FILE_SIZE, OnDisk};
use sector_fs::{
    BlockDevice, DIRECTORY_SECTOR, Directory, FREE_MAP_SECTOR, FileSystem, FormatOptions, FsError,
    ListEntry, SECTOR_SIZE,
};

const ROOT: usize = DIRECTORY_SECTOR;

fn format(num_sectors: usize, dir_entries: usize) -> (Arc<dyn BlockDevice>, Arc<FileSystem>) {
    let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(num_sectors, SECTOR_SIZE));
    let fs = FileSystem::format(
        dev.clone(),
        FormatOptions {
            num_sectors,
            dir_entries,
        },
    )
    .unwrap();
    (dev, fs)
}

fn names(fs: &FileSystem, sector: usize) -> Vec<(usize, String)> {
    fs.list(sector)
        .map(|ListEntry { depth, name, .. }| (depth, name))
        .collect()
}

/// 从两个固定扇区出发，收集所有可达的扇区
fn reachable(dev: &Arc<dyn BlockDevice>) -> BTreeSet<usize> {
    fn file(dev: &Arc<dyn BlockDevice>, sector: usize, seen: &mut BTreeSet<usize>) -> FileHeader {
        assert!(seen.insert(sector), "sector {sector} reached twice");
        let header = FileHeader::fetch_from(dev, sector);
        for block in header.indirect_sectors() {
            assert!(seen.insert(block));
            for data in IndirectBlock::fetch_from(dev, block).sectors() {
                assert!(seen.insert(data));
            }
        }
        header
    }

    fn directory(dev: &Arc<dyn BlockDevice>, sector: usize, seen: &mut BTreeSet<usize>) {
        let header = file(dev, sector, seen);
        let dir = Directory::fetch_from(&header, dev);
        for entry in dir.entries() {
            match entry.name() {
                "." | ".." => {}
                _ if entry.is_dir() => directory(dev, entry.sector(), seen),
                _ => {
                    file(dev, entry.sector(), seen);
                }
            }
        }
    }

    let mut seen = BTreeSet::new();
    file(dev, FREE_MAP_SECTOR, &mut seen);
    directory(dev, DIRECTORY_SECTOR, &mut seen);
    seen
}

fn assert_bitmap_matches_tree(dev: &Arc<dyn BlockDevice>, num_sectors: usize) {
    let map_header = FileHeader::fetch_from(dev, FREE_MAP_SECTOR);
    let bitmap = Bitmap::load(&map_header, dev, num_sectors);
    let seen = reachable(dev);
    for sector in 0..num_sectors {
        assert_eq!(
            seen.contains(&sector),
            bitmap.test(sector),
            "sector {sector} disagrees with the tree"
        );
    }
}

fn dev_bytes(dev: &Arc<dyn BlockDevice>, num_sectors: usize) -> Vec<u8> {
    let mut all = vec![0; num_sectors * SECTOR_SIZE];
    for (sector, chunk) in all.chunks_mut(SECTOR_SIZE).enumerate() {
        dev.read_block(sector, chunk);
    }
    all
}

#[test]
fn small_disk_scenario() {
    let (_, fs) = format(32, 10);
    fs.create("a", 300, ROOT).unwrap();

    let data: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();
    let mut file = fs.open("a", ROOT).unwrap();
    assert_eq!(300, file.length());
    assert_eq!(Ok(300), file.write(&data));
    assert_eq!(300, file.tell());

    let mut back = vec![0; 300];
    assert_eq!(300, file.read_at(&mut back, 0));
    assert_eq!(data, back);

    assert_eq!(Err(FsError::AlreadyExists), fs.create("a", 1, ROOT));
}

#[test]
fn round_trips_through_fresh_handles() {
    let (_, fs) = format(256, 10);
    fs.create("f", 1000, ROOT).unwrap();

    let cases: [(usize, usize); 3] = [
        (0, SECTOR_SIZE),
        (SECTOR_SIZE, 3 * SECTOR_SIZE),
        (SECTOR_SIZE - 7, 20),
    ];
    for (position, len) in cases {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 + position) as u8).collect();
        let mut writer = fs.open("f", ROOT).unwrap();
        assert_eq!(len, writer.write_at(&data, position));
        drop(writer);

        let mut reader = fs.open("f", ROOT).unwrap();
        let mut back = vec![0; len];
        reader.seek(position);
        assert_eq!(len, reader.read(&mut back));
        assert_eq!(data, back, "range at {position}, {len} bytes");
    }
}

#[test]
fn reads_and_writes_stop_at_end_of_file() {
    let (_, fs) = format(64, 10);
    fs.create("f", 10, ROOT).unwrap();
    let mut file = fs.open("f", ROOT).unwrap();

    assert_eq!(10, file.write_at(&[7; 40], 0));
    let mut buf = [0; 40];
    assert_eq!(4, file.read_at(&mut buf, 6));
    assert_eq!(0, file.read_at(&mut buf, 10));
    assert_eq!(0, file.read_at(&mut buf, 500));
}

#[test]
fn write_extends_the_file() {
    let (dev, fs) = format(256, 10);
    fs.create("log", 0, ROOT).unwrap();
    let mut file = fs.open("log", ROOT).unwrap();

    let before = fs.num_clear();
    assert_eq!(Ok(5), file.write(b"hello"));
    file.seek(3000);
    assert_eq!(Ok(4), file.write(b"tail"));
    assert_eq!(3004, file.length());
    // 1 个索引块 + 24 个数据块
    assert_eq!(before - 25, fs.num_clear());

    // 跳过的部分读出来是零
    let mut gap = [0xff; 100];
    assert_eq!(100, file.read_at(&mut gap, 1000));
    assert!(gap.iter().all(|&b| b == 0));

    let mut other = fs.open("log", ROOT).unwrap();
    assert_eq!(3004, other.length());
    let mut tail = [0; 4];
    assert_eq!(4, other.read_at(&mut tail, 3000));
    assert_eq!(b"tail", &tail);

    drop((file, other));
    assert_bitmap_matches_tree(&dev, 256);
}

#[test]
fn stale_handle_sees_extension() {
    let (_, fs) = format(128, 10);
    fs.create("f", 10, ROOT).unwrap();
    let mut first = fs.open("f", ROOT).unwrap();
    let mut second = fs.open("f", ROOT).unwrap();

    first.seek(10);
    first.write(&[1; 300]).unwrap();

    let mut buf = [0; 300];
    assert_eq!(300, second.read_at(&mut buf, 10));
    assert_eq!([1; 300], buf);
    assert_eq!(310, second.length());
}

#[test]
fn extension_without_space_fails_cleanly() {
    let (_, fs) = format(32, 10);
    fs.create("f", 0, ROOT).unwrap();
    let mut file = fs.open("f", ROOT).unwrap();

    let before = fs.num_clear();
    assert_eq!(Err(FsError::NoSpace), file.write(&[0; 100 * SECTOR_SIZE]));
    assert_eq!(before, fs.num_clear());
    assert_eq!(0, file.length());
    assert_eq!(0, file.tell());
}

#[test]
fn write_past_addressable_end_fails_cleanly() {
    let (dev, fs) = format(64, 10);
    fs.create("f", 10, ROOT).unwrap();
    let mut file = fs.open("f", ROOT).unwrap();
    let clear = fs.num_clear();

    file.seek(usize::MAX);
    assert_eq!(Err(FsError::NoSpace), file.write(b"x"));
    file.seek(usize::MAX - 1);
    assert_eq!(Err(FsError::NoSpace), file.write(b"xyz"));
    assert_eq!(usize::MAX - 1, file.tell());
    assert_eq!(10, file.length());
    assert_eq!(clear, fs.num_clear());

    let mut buf = [0; 4];
    assert_eq!(0, file.read(&mut buf));
    assert_bitmap_matches_tree(&dev, 64);
}

#[test]
fn create_then_remove_restores_state() {
    let (dev, fs) = format(256, 10);
    fs.create("keep", 200, ROOT).unwrap();
    let clear = fs.num_clear();
    let entries = names(&fs, ROOT);

    fs.create("tmp", 5000, ROOT).unwrap();
    assert!(fs.num_clear() < clear);
    fs.remove("tmp", ROOT).unwrap();

    assert_eq!(clear, fs.num_clear());
    assert_eq!(entries, names(&fs, ROOT));
    assert_eq!(Err(FsError::NotFound), fs.open("tmp", ROOT).map(|_| ()));
    assert_bitmap_matches_tree(&dev, 256);
}

#[test]
fn failed_create_changes_nothing() {
    let (dev, fs) = format(32, 10);
    let clear = fs.num_clear();

    assert_eq!(Err(FsError::NoSpace), fs.create("big", 40 * SECTOR_SIZE, ROOT));
    assert_eq!(Err(FsError::InvalidName), fs.create("much-too-long", 1, ROOT));
    assert_eq!(Err(FsError::InvalidName), fs.create("", 1, ROOT));
    assert_eq!(clear, fs.num_clear());
    assert!(names(&fs, ROOT).is_empty());

    // 磁盘上的位图同样没有变化
    let remounted = FileSystem::mount(dev.clone());
    assert_eq!(clear, remounted.num_clear());
    assert_bitmap_matches_tree(&dev, 32);
}

#[test]
fn oversized_entries_are_refused_up_front() {
    let (dev, fs) = format(64, 4);
    let clear = fs.num_clear();

    assert_eq!(Err(FsError::NoSpace), fs.make_dir("d", usize::MAX / 2, ROOT));
    assert_eq!(Err(FsError::NoSpace), fs.make_dir("d", MAX_FILE_SIZE + 1, ROOT));
    assert_eq!(Err(FsError::NoSpace), fs.create("f", usize::MAX, ROOT));
    assert_eq!(clear, fs.num_clear());
    assert!(names(&fs, ROOT).is_empty());
    assert_bitmap_matches_tree(&dev, 64);
}

#[test]
fn failed_directory_growth_changes_nothing() {
    // 根目录正好占满一个数据扇区，第 9 项会让它翻倍
    let (dev, fs) = format(32, 8);
    for name in ["a", "b", "c", "d", "e", "f", "g"] {
        fs.create(name, 0, ROOT).unwrap();
    }
    // 文件头 + 索引块 + 16 个数据块，只剩一个空闲扇区
    fs.create("big", 16 * SECTOR_SIZE, ROOT).unwrap();
    assert_eq!(1, fs.num_clear());
    let entries = names(&fs, ROOT);
    let before = dev_bytes(&dev, 32);

    // 新文件头能拿到最后一个扇区，目录扩容却不够
    assert_eq!(Err(FsError::NoSpace), fs.create("x", 0, ROOT));
    assert_eq!(1, fs.num_clear());
    assert_eq!(entries, names(&fs, ROOT));
    assert_eq!(Err(FsError::NotFound), fs.open("x", ROOT).map(|_| ()));
    assert_eq!(before, dev_bytes(&dev, 32));

    let remounted = FileSystem::mount(dev.clone());
    assert_eq!(1, remounted.num_clear());
    assert_eq!(entries, names(&remounted, ROOT));
    assert_bitmap_matches_tree(&dev, 32);
}

#[test]
fn remove_refuses_open_files() {
    let (dev, fs) = format(64, 10);
    fs.create("a", 300, ROOT).unwrap();
    let clear = fs.num_clear();

    let file = fs.open("a", ROOT).unwrap();
    assert!(fs.is_open(file.sector()));
    assert_eq!(1, fs.open_count(file.sector()));
    assert_eq!(Err(FsError::Busy), fs.remove("a", ROOT));
    assert_eq!(clear, fs.num_clear());
    assert_eq!(vec![(0, "a".to_string())], names(&fs, ROOT));

    let sector = file.sector();
    drop(file);
    assert_eq!(0, fs.open_count(sector));
    fs.remove("a", ROOT).unwrap();
    assert_bitmap_matches_tree(&dev, 64);
}

#[test]
fn directories() {
    let (dev, fs) = format(128, 10);
    fs.make_dir("child", 0, ROOT).unwrap();
    let child = fs.change_dir("child", ROOT).unwrap();
    assert_ne!(ROOT, child);
    assert_eq!(Ok(ROOT), fs.change_dir("..", child));
    assert_eq!(Ok(child), fs.change_dir(".", child));

    assert_eq!(
        vec![(0, ".".to_string()), (0, "..".to_string())],
        names(&fs, child)
    );

    fs.create("child/f", 10, ROOT).unwrap();
    fs.make_dir("child/sub", 64, ROOT).unwrap();
    fs.create("g", 10, child).unwrap();
    assert_eq!(
        vec![
            (0, "child".to_string()),
            (1, ".".to_string()),
            (1, "..".to_string()),
            (1, "f".to_string()),
            (1, "sub".to_string()),
            (2, ".".to_string()),
            (2, "..".to_string()),
            (1, "g".to_string()),
        ],
        names(&fs, ROOT)
    );
    assert_bitmap_matches_tree(&dev, 128);
}

#[test]
fn wrong_kinds_are_rejected() {
    let (_, fs) = format(128, 10);
    fs.create("file", 10, ROOT).unwrap();
    fs.make_dir("dir", 0, ROOT).unwrap();

    assert_eq!(Err(FsError::IsADirectory), fs.remove("dir", ROOT));
    assert_eq!(Err(FsError::NotADirectory), fs.change_dir("file", ROOT));
    assert_eq!(Err(FsError::NotADirectory), fs.create("file/x", 1, ROOT));
    assert_eq!(Err(FsError::NotFound), fs.create("nope/x", 1, ROOT));
    assert_eq!(Err(FsError::NotFound), fs.change_dir("nope", ROOT));
    assert_eq!(Err(FsError::NotFound), fs.remove("nope", ROOT));
    assert_eq!(Err(FsError::AlreadyExists), fs.make_dir("file", 0, ROOT));
}

#[test]
fn root_directory_grows_past_format_capacity() {
    let (dev, fs) = format(64, 2);
    for name in ["a", "b", "c", "d", "e"] {
        fs.create(name, 0, ROOT).unwrap();
    }
    assert!(fs.open("c", ROOT).is_ok());

    let remounted = FileSystem::mount(dev.clone());
    assert_eq!(5, names(&remounted, ROOT).len());
    assert!(remounted.open("e", ROOT).is_ok());
    assert_bitmap_matches_tree(&dev, 64);
}

#[test]
fn directory_opened_as_file_tracks_its_growth() {
    let (dev, fs) = format(128, 4);
    fs.make_dir("d", 0, ROOT).unwrap();
    let mut dir = fs.open("d", ROOT).unwrap();
    assert_eq!(2 * 16, dir.length());

    // `a` 让目录表翻倍到 4 项，打开着的实例要能看到
    fs.create("d/a", 10, ROOT).unwrap();
    let mut buf = [0; 4 * 16];
    assert_eq!(4 * 16, dir.read_at(&mut buf, 0));
    assert_eq!(4 * 16, dir.length());

    // 末尾补零只会多出空闲目录项
    dir.seek(dir.length());
    assert_eq!(Ok(200), dir.write(&[0; 200]));
    fs.create("d/b", 10, ROOT).unwrap();
    assert_eq!(
        vec![
            (0, ".".to_string()),
            (0, "..".to_string()),
            (0, "a".to_string()),
            (0, "b".to_string()),
        ],
        names(&fs, fs.change_dir("d", ROOT).unwrap())
    );
    assert_bitmap_matches_tree(&dev, 128);
}

#[test]
fn directory_extension_races_with_entry_creation() {
    let (dev, fs) = format(512, 4);
    fs.make_dir("d", 0, ROOT).unwrap();

    let extender = {
        let fs = fs.clone();
        thread::spawn(move || {
            let mut dir = fs.open("d", ROOT).unwrap();
            // 只写远离前几个目录项的位置
            for i in 0..20 {
                dir.seek(2048 + i * SECTOR_SIZE);
                assert_eq!(Ok(1), dir.write(&[0]));
            }
        })
    };
    let creator = {
        let fs = fs.clone();
        thread::spawn(move || {
            for i in 0..10 {
                fs.create(&format!("d/f{i}"), 100, ROOT).unwrap();
            }
            for i in (0..10).step_by(2) {
                fs.remove(&format!("d/f{i}"), ROOT).unwrap();
            }
        })
    };
    extender.join().unwrap();
    creator.join().unwrap();

    let dir = fs.change_dir("d", ROOT).unwrap();
    assert_eq!(2 + 5, names(&fs, dir).len());
    assert_eq!(2048 + 19 * SECTOR_SIZE + 1, fs.open("d", ROOT).unwrap().length());
    assert_bitmap_matches_tree(&dev, 512);
}

#[test]
fn mount_sees_formatted_contents() {
    let (dev, fs) = format(128, 10);
    fs.create("data", 0, ROOT).unwrap();
    fs.make_dir("dir", 0, ROOT).unwrap();
    fs.open("data", ROOT).unwrap().write(b"persistent").unwrap();
    let clear = fs.num_clear();
    drop(fs);

    let fs = FileSystem::mount(dev);
    assert_eq!(clear, fs.num_clear());
    let mut file = fs.open("data", ROOT).unwrap();
    let mut buf = [0; 10];
    assert_eq!(10, file.read(&mut buf));
    assert_eq!(b"persistent", &buf);
    assert!(fs.change_dir("dir", ROOT).is_ok());
}

#[test]
fn bad_geometry_is_rejected() {
    let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(64, SECTOR_SIZE));
    for options in [
        FormatOptions {
            num_sectors: 4,
            dir_entries: 10,
        },
        FormatOptions {
            num_sectors: 60,
            dir_entries: 10,
        },
        FormatOptions {
            num_sectors: 64,
            dir_entries: 0,
        },
        FormatOptions {
            num_sectors: 64,
            dir_entries: usize::MAX / 8,
        },
        FormatOptions {
            num_sectors: 64,
            dir_entries: MAX_FILE_SIZE / 16 + 1,
        },
    ] {
        assert_eq!(
            Some(FsError::InvalidGeometry),
            FileSystem::format(dev.clone(), options).err()
        );
    }
    assert_eq!(1024, FormatOptions::default().num_sectors);
}

#[test]
fn print_dumps_every_structure() {
    let (_, fs) = format(64, 4);
    fs.create("a", 3, ROOT).unwrap();
    fs.open("a", ROOT).unwrap().write_at(b"hi\n", 0);

    let mut out = String::new();
    fs.print(&mut out).unwrap();
    assert!(out.contains("Bit map file header:"));
    assert!(out.contains("Directory file header:"));
    assert!(out.contains("Bitmap set:\n0, 1, "));
    assert!(out.contains("Data blocks: "));
    assert!(out.contains("Name: a, Sector: "));
    assert!(out.contains("hi\\a"));
}
