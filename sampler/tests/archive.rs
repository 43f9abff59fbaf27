use std::{
    fs::{self, File},
    io::Read,
    path::PathBuf,
};

use image::{GrayImage, Rgb, RgbImage};
use sampler::{
    SamplerErr,
    archive::{self, ARRAY_ENTRY},
    layout::SampleLayout,
};
use tempfile::tempdir;

fn write_samples(layout: &SampleLayout, count: usize, width: u32, height: u32) {
    fs::create_dir_all(layout.dir()).unwrap();
    for index in 0..count {
        let image = RgbImage::from_pixel(width, height, Rgb([index as u8, 0, 255]));
        image.save(layout.sample_path(index)).unwrap();
    }
}

fn read_array(path: &PathBuf) -> Vec<u8> {
    let mut zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    assert_eq!(zip.len(), 1);

    let mut entry = zip.by_name(ARRAY_ENTRY).unwrap();
    assert_eq!(entry.compression(), zip::CompressionMethod::Stored);

    let mut npy = Vec::new();
    entry.read_to_end(&mut npy).unwrap();
    npy
}

#[test]
fn archive_holds_only_the_requested_samples_in_order() {
    let tmp = tempdir().unwrap();
    let layout = SampleLayout::from_dir(tmp.path().join("run_cfg1.5-0.0-1.0"));
    write_samples(&layout, 6, 4, 2);

    let archive = archive::build_npz(&layout, 4).unwrap();
    assert_eq!(archive.path, tmp.path().join("run_cfg1.5-0.0-1.0.npz"));
    assert_eq!(archive.shape, [4, 2, 4, 3]);

    let npy = read_array(&archive.path);
    let header = archive::npy_header([4, 2, 4, 3]);
    assert_eq!(&npy[..header.len()], header.as_slice());

    let data = &npy[header.len()..];
    assert_eq!(data.len(), 4 * 2 * 4 * 3);
    for (index, image) in data.chunks_exact(2 * 4 * 3).enumerate() {
        assert!(image.chunks_exact(3).all(|px| px == [index as u8, 0, 255]));
    }
}

#[test]
fn missing_sample_leaves_no_archive_behind() {
    let tmp = tempdir().unwrap();
    let layout = SampleLayout::from_dir(tmp.path().join("run"));
    write_samples(&layout, 3, 2, 2);
    fs::remove_file(layout.sample_path(1)).unwrap();

    let err = archive::build_npz(&layout, 3).unwrap_err();
    assert!(matches!(err, SamplerErr::MissingSample { index: 1, .. }));

    let leftovers: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("run")]);
}

#[test]
fn samples_must_share_the_first_shape() {
    let tmp = tempdir().unwrap();
    let layout = SampleLayout::from_dir(tmp.path().join("run"));
    write_samples(&layout, 2, 2, 2);
    RgbImage::new(3, 2).save(layout.sample_path(2)).unwrap();

    let err = archive::build_npz(&layout, 3).unwrap_err();
    assert!(matches!(err, SamplerErr::MalformedSample { index: 2, .. }));
    assert!(!layout.archive_path().exists());
}

#[test]
fn samples_must_be_rgb() {
    let tmp = tempdir().unwrap();
    let layout = SampleLayout::from_dir(tmp.path().join("run"));
    write_samples(&layout, 1, 2, 2);
    GrayImage::new(2, 2).save(layout.sample_path(1)).unwrap();

    let err = archive::build_npz(&layout, 2).unwrap_err();
    assert!(matches!(err, SamplerErr::MalformedSample { index: 1, .. }));
}

#[test]
fn empty_archives_are_refused() {
    let tmp = tempdir().unwrap();
    let layout = SampleLayout::from_dir(tmp.path().join("run"));

    let err = archive::build_npz(&layout, 0).unwrap_err();
    assert!(matches!(err, SamplerErr::EmptyArchive));
}
