use tempfile::NamedTempFile;

use sqlog::{BinSearchValue, BlockIo, Error, FileBlockIo, MemBlockIo, Reader, TypeTag, Writer, WriterConfig};

fn open_rw(path: &std::path::Path) -> FileBlockIo {
    let file = std::fs::OpenOptions::new().read(true).write(true).open(path).unwrap();
    FileBlockIo::new(file)
}

fn reopen_rw(path: &std::path::Path) -> (FileBlockIo, u64) {
    let file = std::fs::OpenOptions::new().read(true).write(true).open(path).unwrap();
    let len = file.metadata().unwrap().len();
    (FileBlockIo::new(file), len)
}

fn text_row(cols: &[&str]) -> Vec<(TypeTag, Vec<u8>)> {
    cols.iter().map(|c| (TypeTag::Text, c.as_bytes().to_vec())).collect()
}

#[test]
fn hello_world_file_is_exactly_two_pages() {
    let tmp = NamedTempFile::new().unwrap();
    let path = tmp.path().to_path_buf();
    let io = open_rw(&path);
    let mut writer = Writer::write_init(io, WriterConfig::new(512, 5).table_name("messages")).unwrap();

    for cols in [
        text_row(&["Hello", "World", "How", "Are", "You"]),
        text_row(&["I", "am", "fine", "thank", "you"]),
    ] {
        let refs: Vec<(TypeTag, &[u8])> = cols.iter().map(|(t, v)| (*t, v.as_slice())).collect();
        writer.append_row_with_values(&refs).unwrap();
    }
    writer.finalize().unwrap();

    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len, 1024);

    let (io, _) = reopen_rw(&path);
    let mut reader = Reader::read_init(io).unwrap();

    use sqlog::record::ColumnValue;

    reader.srch_row_by_id(1).unwrap();
    assert_eq!(reader.read_col_val(0).unwrap(), ColumnValue::Text("Hello".to_string()));
    assert_eq!(reader.read_col_val(4).unwrap(), ColumnValue::Text("You".to_string()));

    reader.srch_row_by_id(2).unwrap();
    assert_eq!(reader.read_col_val(0).unwrap(), ColumnValue::Text("I".to_string()));

    assert!(matches!(reader.srch_row_by_id(3), Err(Error::NotFound)));
}

#[test]
fn resumable_append_recovers_leaf_state_and_adds_a_third_row() {
    let tmp = NamedTempFile::new().unwrap();
    let path = tmp.path().to_path_buf();
    {
        let io = open_rw(&path);
        let mut writer = Writer::write_init(io, WriterConfig::new(512, 5).table_name("messages")).unwrap();
        for cols in [
            text_row(&["Hello", "World", "How", "Are", "You"]),
            text_row(&["I", "am", "fine", "thank", "you"]),
        ] {
            let refs: Vec<(TypeTag, &[u8])> = cols.iter().map(|(t, v)| (*t, v.as_slice())).collect();
            writer.append_row_with_values(&refs).unwrap();
        }
        writer.finalize().unwrap();
    }

    {
        let (io, len) = reopen_rw(&path);
        let mut writer = Writer::init_for_append(io, WriterConfig::new(512, 5).table_name("messages"), len).unwrap();
        let cols = text_row(&["good", "bye", "and", "see", "later"]);
        let refs: Vec<(TypeTag, &[u8])> = cols.iter().map(|(t, v)| (*t, v.as_slice())).collect();
        let rowid = writer.append_row_with_values(&refs).unwrap();
        assert_eq!(rowid, 3);
        writer.finalize().unwrap();
    }

    let (io, _) = reopen_rw(&path);
    let mut reader = Reader::read_init(io).unwrap();
    for rowid in 1..=3u64 {
        reader.srch_row_by_id(rowid).unwrap();
        assert_eq!(reader.cur_row_col_count().unwrap(), 5);
    }
    assert!(matches!(reader.srch_row_by_id(4), Err(Error::NotFound)));
}

#[test]
fn read_init_rejects_a_database_that_was_never_finalized() {
    // Build page 1 directly, the way write_init does internally, but never
    // patch in a real root page: the sqlite_master row's rootpage column is
    // left at its zero placeholder.
    let (page1, _) = sqlog::header::build_page1(512, 0, "log", 1).unwrap();
    let mut io = MemBlockIo::new();
    io.write_at(page1.bytes(), 0).unwrap();

    assert!(matches!(Reader::read_init(io), Err(Error::NotFinalized)));
}

#[test]
fn int_width_selection_picks_smallest_fitting_serial_type() {
    let io = MemBlockIo::new();
    let mut writer = Writer::write_init(io, WriterConfig::new(512, 1)).unwrap();

    for value in [127i64, 128, 32768, 2147483648] {
        let bytes: Vec<u8> = if value <= i8::MAX as i64 {
            (value as i8).to_be_bytes().to_vec()
        } else if value <= i16::MAX as i64 {
            (value as i16).to_be_bytes().to_vec()
        } else if value <= i32::MAX as i64 {
            (value as i32).to_be_bytes().to_vec()
        } else {
            value.to_be_bytes().to_vec()
        };
        writer.append_row_with_values(&[(TypeTag::Int, &bytes)]).unwrap();
    }
    let io = writer.finalize().unwrap();

    let mut reader = Reader::read_init(io).unwrap();
    let expect = [127i64, 128, 32768, 2147483648];
    for (i, expected) in expect.iter().enumerate() {
        reader.srch_row_by_id(i as u64 + 1).unwrap();
        let got = match reader.read_col_val(0).unwrap() {
            sqlog::record::ColumnValue::I8(v) => v as i64,
            sqlog::record::ColumnValue::I16(v) => v as i64,
            sqlog::record::ColumnValue::I32(v) => v as i64,
            sqlog::record::ColumnValue::I64(v) => v,
            other => panic!("unexpected value {other:?}"),
        };
        assert_eq!(got, *expected);
    }
}

#[test]
fn binary_search_on_monotonic_column_finds_exact_value() {
    let io = MemBlockIo::new();
    let mut writer = Writer::write_init(io, WriterConfig::new(512, 2)).unwrap();

    for c1 in (0..2000).step_by(2) {
        let zero = 0i64.to_be_bytes();
        let c1_bytes = (c1 as i64).to_be_bytes();
        writer
            .append_row_with_values(&[(TypeTag::Int, &zero), (TypeTag::Int, &c1_bytes)])
            .unwrap();
    }
    let io = writer.finalize().unwrap();
    let mut reader = Reader::read_init(io).unwrap();

    reader.bin_srch_row_by_val(1, BinSearchValue::Int(1000), false).unwrap();
    assert_eq!(reader.read_col_val(1).unwrap(), sqlog::record::ColumnValue::I64(1000));

    assert!(matches!(
        reader.bin_srch_row_by_val(1, BinSearchValue::Int(1001), false),
        Err(Error::NotFound)
    ));
}

#[test]
fn rowids_strictly_increase_across_many_rows() {
    let io = MemBlockIo::new();
    let mut writer = Writer::write_init(io, WriterConfig::new(512, 1)).unwrap();
    let mut last = 0u64;
    for i in 0..500i64 {
        let bytes = i.to_be_bytes();
        let rowid = writer.append_row_with_values(&[(TypeTag::Int, &bytes)]).unwrap();
        assert!(rowid > last);
        last = rowid;
    }
    writer.finalize().unwrap();
}

/// Not the full 1,000,000-row, 65536-byte-page scenario (too slow for a
/// routine test run); exercises the same multi-level-tree path at a scale
/// that still forces more than one interior level at 512-byte pages.
#[test]
fn multilevel_tree_builds_more_than_one_interior_level() {
    let io = MemBlockIo::new();
    let mut writer = Writer::write_init(io, WriterConfig::new(512, 1)).unwrap();
    for i in 0..6000i64 {
        let bytes = i.to_be_bytes();
        writer.append_row_with_values(&[(TypeTag::Int, &bytes)]).unwrap();
    }
    let io = writer.finalize().unwrap();

    let mut reader = Reader::read_init(io).unwrap();
    reader.srch_row_by_id(1).unwrap();
    reader.srch_row_by_id(6000).unwrap();
    assert!(matches!(reader.srch_row_by_id(6001), Err(Error::NotFound)));
}

#[test]
#[ignore = "1,000,000 rows at 65536-byte pages: run explicitly, not part of the default suite"]
fn full_scale_multilevel_matches_row_count() {
    let io = MemBlockIo::new();
    let mut writer = Writer::write_init(io, WriterConfig::new(65536, 5)).unwrap();
    let real = sqlog::varint::double_to_bits(1.0).to_be_bytes();
    for i in 0..1_000_000i64 {
        let text = format!("row-{i:020}");
        let int_bytes = i.to_be_bytes();
        writer
            .append_row_with_values(&[
                (TypeTag::Text, text.as_bytes()),
                (TypeTag::Int, &int_bytes),
                (TypeTag::Real, &real),
                (TypeTag::Real, &real),
                (TypeTag::Text, b"variable length tail"),
            ])
            .unwrap();
    }
    let io = writer.finalize().unwrap();

    let mut reader = Reader::read_init(io).unwrap();
    reader.srch_row_by_id(1).unwrap();
    reader.srch_row_by_id(1_000_000).unwrap();
    assert!(matches!(reader.srch_row_by_id(1_000_001), Err(Error::NotFound)));
}
