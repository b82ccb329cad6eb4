use blockdev::{BlockDevice, FileDisk, MemDisk, BLOCK_SIZE};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::TempDir;

fn bench_mem_disk(c: &mut Criterion) {
    let mut group = c.benchmark_group("mem_disk");
    group.sample_size(50);
    group.throughput(Throughput::Bytes(BLOCK_SIZE as u64));

    group.bench_function("write_block", |b| {
        let disk = MemDisk::new();
        let block = [b'x'; BLOCK_SIZE];
        let mut blockno = 0u32;

        b.iter(|| {
            disk.write_block(1, blockno % 1024, &block).unwrap();
            blockno = blockno.wrapping_add(1);
        });
    });

    group.bench_function("read_block", |b| {
        let disk = MemDisk::new();
        let block = [b'x'; BLOCK_SIZE];
        for blockno in 0..1024 {
            disk.write_block(1, blockno, &block).unwrap();
        }

        let mut buf = [0u8; BLOCK_SIZE];
        let mut blockno = 0u32;
        b.iter(|| {
            disk.read_block(1, blockno % 1024, &mut buf).unwrap();
            black_box(&buf);
            blockno = blockno.wrapping_add(1);
        });
    });

    group.finish();
}

fn bench_file_disk(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_disk");
    group.sample_size(50);
    group.throughput(Throughput::Bytes(BLOCK_SIZE as u64));

    group.bench_function("write_block", |b| {
        let dir = TempDir::new().unwrap();
        let disk = FileDisk::create(dir.path().join("bench.img"), 1, 1024).unwrap();
        let block = [b'x'; BLOCK_SIZE];
        let mut blockno = 0u32;

        b.iter(|| {
            disk.write_block(1, blockno % 1024, &block).unwrap();
            blockno = blockno.wrapping_add(1);
        });
    });

    group.bench_function("read_block", |b| {
        let dir = TempDir::new().unwrap();
        let disk = FileDisk::create(dir.path().join("bench.img"), 1, 1024).unwrap();

        let mut buf = [0u8; BLOCK_SIZE];
        let mut blockno = 0u32;
        b.iter(|| {
            disk.read_block(1, blockno % 1024, &mut buf).unwrap();
            black_box(&buf);
            blockno = blockno.wrapping_add(1);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_mem_disk, bench_file_disk);
criterion_main!(benches);
