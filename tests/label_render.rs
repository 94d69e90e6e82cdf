use lxu_listing_tools::label::{LabelRenderer, LabelSpec, decode_row};
use lxu_listing_tools::settings::LabelSettings;

fn spec(sku: &str, title: &str) -> LabelSpec {
    LabelSpec {
        sku: sku.to_string(),
        title: title.to_string(),
        spec_option: Some("그레이 / L".to_string()),
    }
}

fn barcode_scanline(renderer: &LabelRenderer, spec: &LabelSpec, png: &[u8]) -> Vec<bool> {
    let layout = renderer.layout(spec).expect("layout");
    let row = layout.barcode.y + layout.barcode.height / 2;
    let image = image::load_from_memory(png).expect("png").to_luma8();
    (0..image.width())
        .map(|x| image.get_pixel(x, row).0[0] < 128)
        .collect()
}

#[test]
fn rendered_barcode_reads_back_as_the_sku() {
    let renderer = LabelRenderer::new(LabelSettings::default());
    for sku in ["LXU-001", "20240517", "PJJ123C"] {
        let spec = spec(sku, "LxU 접이식 수납함");
        let label = renderer.render(&spec).expect("render");
        let row = barcode_scanline(&renderer, &spec, &label.png);
        assert_eq!(decode_row(&row).expect("decode"), sku);
    }
}

#[test]
fn canvas_size_does_not_depend_on_title_length() {
    let renderer = LabelRenderer::new(LabelSettings::default());
    let titles = [
        "박스",
        "LxU 접이식 대용량 수납함",
        "LxU 접이식 대용량 수납함 옷 정리함 뚜껑 포함 다용도 리빙박스 그레이 3개 세트 옷장 이불 보관 가방 대형 사이즈",
        "Supercalifragilisticexpialidocious-organizer-without-any-spaces-at-all",
    ];
    for title in titles {
        let label = renderer.render(&spec("LXU-001", title)).expect("render");
        let image = image::load_from_memory(&label.png).expect("png");
        assert_eq!((image.width(), image.height()), (591, 236));
        assert_eq!((label.width, label.height), (591, 236));
    }
}

#[test]
fn pdf_export_wraps_the_png() {
    let renderer = LabelRenderer::new(LabelSettings::default());
    let label = renderer.render(&spec("LXU-001", "box")).expect("render");
    let pdf = renderer.render_pdf(&label).expect("pdf");
    assert!(pdf.starts_with(b"%PDF"));
}

#[test]
fn invalid_skus_are_reported() {
    let renderer = LabelRenderer::new(LabelSettings::default());
    let err = renderer
        .render(&spec(&"W".repeat(80), "box"))
        .unwrap_err();
    assert_eq!(err.to_string(), "sku is too long for the label width");
    assert!(renderer.render(&spec("상품-1", "box")).is_err());
    assert!(renderer.render(&spec("", "box")).is_err());
}
