use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

pub mod read {
    use std::path::PathBuf;
    use std::sync::OnceLock;

    use divan::Bencher;
    use tempfile::TempDir;
    use vpkedit_vpk::{Archive, CompressionMethod, EntryOptions, VpkOptions};

    static FIXTURE: OnceLock<(TempDir, PathBuf)> = OnceLock::new();

    fn get_input() -> &'static PathBuf {
        &FIXTURE
            .get_or_init(|| {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("bench_dir.vpk");

                let mut archive = Archive::create(
                    VpkOptions::builder()
                        .compression(CompressionMethod::Zlib)
                        .chunk_size(1 << 20)
                        .build(),
                );
                for i in 0..512u32 {
                    let data: Vec<u8> = (0..4096u32).map(|b| ((b * i) % 251) as u8).collect();
                    archive
                        .add_file(&format!("dir{}/file{i}.bin", i % 16), data, EntryOptions::default())
                        .unwrap();
                }
                archive.save(&path).unwrap();
                (dir, path)
            })
            .1
    }

    #[divan::bench]
    fn open(bencher: Bencher) {
        let path = get_input();
        bencher.bench(|| {
            divan::black_box(Archive::open(path).unwrap());
        });
    }

    #[divan::bench(sample_count = 1)]
    fn read_entry_first(bencher: Bencher) {
        let archive = Archive::open(get_input()).unwrap();
        let first = archive.files().next().map(|(p, _)| p.to_owned()).unwrap();
        bencher.bench_local(move || {
            divan::black_box(archive.read_entry(&first).unwrap());
        });
    }

    #[divan::bench(sample_count = 1)]
    fn read_entry_all(bencher: Bencher) {
        let archive = Archive::open(get_input()).unwrap();
        bencher.bench_local(move || {
            for (path, _) in archive.files() {
                divan::black_box(archive.read_entry(path).unwrap());
            }
        });
    }

    #[divan::bench(sample_count = 1)]
    fn verify(bencher: Bencher) {
        let archive = Archive::open(get_input()).unwrap();
        bencher.bench_local(move || {
            divan::black_box(archive.verify());
        });
    }
}
