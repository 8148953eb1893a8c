use sgcache::resource::{ConvertOptions, RAW_PREVIEW_LIMIT, Resource};
use sgcache::rules::ConversionRule;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Prépare un répertoire de travail avec un fichier d'entrée et une base
/// de sortie pré-allouée, comme le fait le cache avant une conversion.
fn create_test_files(name: &str, content: &[u8]) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join(name);
    std::fs::write(&input, content).unwrap();
    let tmp_output = dir.path().join("preview-test");
    std::fs::write(&tmp_output, b"").unwrap();
    (dir, input, tmp_output)
}

fn options(rules: Vec<ConversionRule>) -> ConvertOptions {
    ConvertOptions {
        rules,
        timeout: Duration::from_secs(10),
        mime_command: Vec::new(),
    }
}

fn rule(ext: &str) -> ConversionRule {
    ConversionRule {
        ext: vec![ext.to_string()],
        ..Default::default()
    }
}

fn shell(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

#[tokio::test]
async fn test_raw_fallback_without_rule() {
    let (_dir, input, tmp) = create_test_files("a.txt", b"hello spyglass");
    let resource = Resource::convert(input.clone(), "k1".to_string(), &options(vec![]), tmp).await;

    assert_eq!(resource.html, "<xmp>hello spyglass</xmp>");
    // En repli brut c'est le fichier original qui est servi
    assert_eq!(resource.src_file, input);
    let reader = resource.reader.as_ref().unwrap();
    assert_eq!(reader.len(), 14);
}

#[tokio::test]
async fn test_raw_fallback_escapes_markup() {
    let (_dir, input, tmp) = create_test_files("a.html", b"<b>&</b>");
    let resource = Resource::convert(input, "k1".to_string(), &options(vec![]), tmp).await;
    assert_eq!(resource.html, "<xmp>&lt;b&gt;&amp;&lt;/b&gt;</xmp>");
}

#[tokio::test]
async fn test_raw_fallback_truncates_large_files() {
    let content = vec![b'a'; RAW_PREVIEW_LIMIT + 1000];
    let (_dir, input, tmp) = create_test_files("big.txt", &content);
    let resource = Resource::convert(input, "k1".to_string(), &options(vec![]), tmp).await;

    assert!(resource.html.ends_with("[...]</xmp>"));
    let expected = format!(
        "<xmp>{}\n\n[...]</xmp>",
        "a".repeat(RAW_PREVIEW_LIMIT)
    );
    assert_eq!(resource.html, expected);
}

#[tokio::test]
async fn test_raw_fallback_renders_binary() {
    let (_dir, input, tmp) = create_test_files("blob.bin", b"ab\x00cd\x00");
    let resource = Resource::convert(input, "k1".to_string(), &options(vec![]), tmp).await;

    // Les NUL sont remplacés, jamais rejetés
    assert!(!resource.html.contains('\0'));
    assert!(resource.html.contains('\u{FFFD}'));
    assert!(resource.html.starts_with("<xmp>"));
}

#[tokio::test]
async fn test_raw_fallback_unreadable_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.txt");
    let tmp = dir.path().join("preview-test");
    std::fs::write(&tmp, b"").unwrap();

    let resource = Resource::convert(input, "k1".to_string(), &options(vec![]), tmp).await;
    assert_eq!(resource.html, "<xmp></xmp>");
    assert!(resource.reader.is_none());
}

#[tokio::test]
async fn test_direct_rule_serves_original() {
    let (_dir, input, tmp) = create_test_files("photo.png", b"not really a png");
    let mut png = rule("png");
    png.html = Some(r#"<img src="{url}">"#.to_string());

    let resource = Resource::convert(input.clone(), "k7".to_string(), &options(vec![png]), tmp).await;
    assert_eq!(resource.html, r#"<img src="/src/k7">"#);
    assert_eq!(resource.src_file, input);
    assert!(resource.reader.is_some());
}

#[tokio::test]
async fn test_first_matching_rule_wins() {
    let (_dir, input, tmp) = create_test_files("x.txt", b"text");
    let mut first = rule("txt");
    first.html = Some("first".to_string());
    let mut second = rule("txt");
    second.html = Some("second".to_string());

    let resource =
        Resource::convert(input, "k1".to_string(), &options(vec![first, second]), tmp).await;
    assert_eq!(resource.html, "first");
}

#[tokio::test]
async fn test_command_rule_discovers_artifact() {
    let (_dir, input, tmp) = create_test_files("v.dat", b"fake video bytes");
    let mut convert = rule("dat");
    // La commande ajoute une extension, comme le font ffmpeg et consorts
    convert.cmd = shell("cp {input} {output}.conv".to_string());
    convert.html = Some(r#"<video src="{url}" data-file="{outputext}">"#.to_string());

    let resource = Resource::convert(input, "k2".to_string(), &options(vec![convert]), tmp.clone()).await;

    // L'artefact réellement produit a été retrouvé par préfixe
    let artifact = PathBuf::from(format!("{}.conv", tmp.display()));
    assert_eq!(resource.src_file, artifact);
    // Le HTML référence l'URL stable, pas un chemin du système de fichiers
    assert!(resource.html.contains("/src/k2"));
    assert!(resource.html.contains(&format!("{}.conv", tmp.display())));

    let reader = resource.reader.as_ref().unwrap();
    assert_eq!(reader.len(), 16);
}

#[tokio::test]
async fn test_command_rule_writing_output_directly() {
    let (_dir, input, tmp) = create_test_files("v.dat", b"0123456789");
    let mut convert = rule("dat");
    convert.cmd = shell("cp {input} {output}".to_string());
    convert.html = Some(r#"<video src="{url}">"#.to_string());

    let resource = Resource::convert(input, "k3".to_string(), &options(vec![convert]), tmp.clone()).await;
    assert_eq!(resource.src_file, tmp);
    assert_eq!(resource.reader.as_ref().unwrap().len(), 10);
}

#[tokio::test]
async fn test_command_failure_falls_back_to_raw() {
    let (_dir, input, tmp) = create_test_files("broken.dat", b"raw content");
    let mut convert = rule("dat");
    convert.cmd = shell("echo boom >&2; exit 3".to_string());
    convert.html = Some("<b>never shown</b>".to_string());

    let resource =
        Resource::convert(input.clone(), "k4".to_string(), &options(vec![convert]), tmp).await;

    // Le rendu est exactement celui du repli brut sur le fichier original
    assert_eq!(resource.html, "<xmp>raw content</xmp>");
    assert_eq!(resource.src_file, input);
    // Les sorties de la commande restent disponibles pour le diagnostic
    assert!(resource.stderr.contains("boom"));
}

#[tokio::test]
async fn test_command_timeout_falls_back_to_raw() {
    let (_dir, input, tmp) = create_test_files("slow.dat", b"slow content");
    let mut convert = rule("dat");
    convert.cmd = shell("sleep 30".to_string());
    convert.html = Some("<b>never shown</b>".to_string());
    let options = ConvertOptions {
        rules: vec![convert],
        timeout: Duration::from_millis(100),
        mime_command: Vec::new(),
    };

    let started = std::time::Instant::now();
    let resource = Resource::convert(input, "k5".to_string(), &options, tmp).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(resource.html, "<xmp>slow content</xmp>");
}

#[tokio::test]
async fn test_content_placeholder_inlines_artifact() {
    let (_dir, input, tmp) = create_test_files("d.dat", b"unused");
    let mut convert = rule("dat");
    convert.cmd = shell("printf '<svg>inline</svg>' > {output}".to_string());
    convert.html = Some("{content}".to_string());

    let resource = Resource::convert(input, "k6".to_string(), &options(vec![convert]), tmp).await;
    assert_eq!(resource.html, "<svg>inline</svg>");
}

#[tokio::test]
async fn test_stdout_and_stderr_placeholders() {
    let (_dir, input, tmp) = create_test_files("d.dat", b"unused");
    let mut convert = rule("dat");
    convert.cmd = shell("echo OUT; echo ERR >&2".to_string());
    convert.html = Some("<pre>{stdout}|{stderr}</pre>".to_string());

    let resource = Resource::convert(input, "k8".to_string(), &options(vec![convert]), tmp).await;
    assert_eq!(resource.html, "<pre>OUT\n|ERR\n</pre>");
}

#[tokio::test]
async fn test_src_template_overrides_artifact() {
    let (_dir, input, tmp) = create_test_files("d.dat", b"original");
    let mut convert = rule("dat");
    convert.cmd = shell("cp {input} {output}.x".to_string());
    convert.src = Some("{input}".to_string());
    convert.html = Some(r#"<a href="{url}">doc</a>"#.to_string());

    let resource =
        Resource::convert(input.clone(), "k9".to_string(), &options(vec![convert]), tmp).await;
    // Le fichier servi est celui désigné par le gabarit src
    assert_eq!(resource.src_file, input);
    assert_eq!(resource.reader.as_ref().unwrap().len(), 8);
}

#[tokio::test]
async fn test_mime_rule_matches_through_probe() {
    let (_dir, input, tmp) = create_test_files("noext", b"content");
    let mut by_mime = ConversionRule::default();
    by_mime.mime = vec!["text/x-special".to_string()];
    by_mime.html = Some("matched by mime".to_string());
    let options = ConvertOptions {
        rules: vec![by_mime],
        timeout: Duration::from_secs(10),
        // Sonde factice au comportement déterministe
        mime_command: shell("echo text/x-special".to_string()),
    };

    let resource = Resource::convert(input, "k10".to_string(), &options, tmp).await;
    assert_eq!(resource.html, "matched by mime");
}
