use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use triplex::{FileLocation, FormatError, Index, IndexBuilder, VectorType};

const DIM: usize = 8;

fn sample_bytes(ty: VectorType) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(0x7121_9e1f);
    let mut builder = IndexBuilder::new(ty);
    for i in 0..24u32 {
        let v: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        let path = format!("docs/part-{}.json", i % 4);
        builder.push(&v, &path, FileLocation { chunk: i }).unwrap();
    }
    let mut bytes = Vec::new();
    builder.finish().unwrap().write_to(&mut bytes).unwrap();
    bytes
}

#[test]
fn test_every_strict_prefix_is_rejected() {
    for ty in [VectorType::Int8, VectorType::Float32] {
        let bytes = sample_bytes(ty);
        assert!(Index::from_bytes(&bytes).is_ok());
        for cut in 0..bytes.len() {
            match Index::from_bytes(&bytes[..cut]) {
                Err(FormatError::TruncatedFile { expected, actual }) => {
                    assert_eq!(actual, cut as u64, "cut={cut}");
                    assert!(expected > actual, "cut={cut}");
                }
                other => panic!("cut={cut}: expected TruncatedFile, got {other:?}"),
            }
        }
    }
}

#[test]
fn test_random_mutations_never_panic() {
    let original = sample_bytes(VectorType::Int8);
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..2000 {
        let mut bytes = original.clone();
        let flips = rng.gen_range(1..8);
        for _ in 0..flips {
            let at = rng.gen_range(0..bytes.len());
            bytes[at] = rng.gen();
        }
        // Either a consistent index or a typed error; never a partial index.
        if let Ok(index) = Index::from_bytes(&bytes) {
            assert_eq!(index.matrix_bytes().len(), index.len() * index.row_len());
            for triple in index.triples() {
                assert!(triple.path_id() < index.paths().len() as u32);
            }
        }
    }
}

#[test]
fn test_appended_garbage_is_rejected() {
    let mut bytes = sample_bytes(VectorType::Float32);
    bytes.push(0);
    assert!(matches!(
        Index::from_bytes(&bytes),
        Err(FormatError::FormatMismatch(_))
    ));
}

#[test]
fn test_non_finite_float_matrix_rejected() {
    let mut bytes = sample_bytes(VectorType::Float32);
    // First matrix component sits right after the 20-byte header.
    bytes[20..24].copy_from_slice(&f32::INFINITY.to_le_bytes());
    assert!(Index::from_bytes(&bytes).is_err());
}

#[test]
fn test_header_fields_checked() {
    let good = sample_bytes(VectorType::Int8);

    let mut bad_magic = good.clone();
    bad_magic[0] = b'X';
    assert!(matches!(
        Index::from_bytes(&bad_magic),
        Err(FormatError::FormatMismatch(_))
    ));

    let mut bad_tag = good.clone();
    bad_tag[8..12].copy_from_slice(&7u32.to_le_bytes());
    assert!(matches!(
        Index::from_bytes(&bad_tag),
        Err(FormatError::UnsupportedVectorType(7))
    ));

    let mut zero_dim = good;
    zero_dim[12..16].copy_from_slice(&0u32.to_le_bytes());
    assert!(matches!(
        Index::from_bytes(&zero_dim),
        Err(FormatError::FormatMismatch(_))
    ));
}
