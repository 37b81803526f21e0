use chrono::{TimeZone, Utc};
use spamsub_core::Address;
use spamsub_renderer::{Document, PublicationContext, Renderer};
use tempfile::TempDir;

fn addrs(raw: &[&str]) -> Vec<Address> {
    raw.iter().map(|s| Address::normalize(s).expect("address")).collect()
}

fn ctx(all: &[&str], added: &[&str]) -> PublicationContext {
    let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
    PublicationContext::new(&addrs(all), &addrs(added), now)
}

#[test]
fn pull_request_body_lists_new_addresses() {
    let renderer = Renderer::new().expect("renderer");
    let body = renderer
        .render(
            Document::PullRequestBody,
            &ctx(&["old.com", "new.com", "newer.io"], &["newer.io", "new.com"]),
        )
        .expect("render body");

    assert!(body.starts_with("Updates from the webapp"));
    assert!(body.contains("3 addresses listed"));
    assert!(body.contains("- `@new.com`\n- `@newer.io`"), "body was:\n{body}");
}

#[test]
fn pull_request_body_without_new_addresses_has_no_list() {
    let renderer = Renderer::new().expect("renderer");
    let body = renderer
        .render(Document::PullRequestBody, &ctx(&["only.com"], &[]))
        .expect("render body");
    assert!(body.contains("1 address listed"));
    assert!(!body.contains("New since the last publication"));
}

#[test]
fn user_template_overrides_embedded_artifact() {
    let dir = TempDir::new().expect("template dir");
    std::fs::write(
        dir.path().join("spammers.txt.tera"),
        "{% for address in addresses %}{{ address }} OR\n{% endfor %}",
    )
    .expect("write override");

    let renderer = Renderer::with_template_dir(Some(dir.path())).expect("renderer");
    let out = renderer
        .render(Document::Artifact, &ctx(&["b.com", "a.com"], &[]))
        .expect("render");
    assert_eq!(out, "@a.com OR\n@b.com OR\n");

    // Untouched documents keep the embedded template.
    let title = renderer
        .render(Document::PullRequestTitle, &ctx(&[], &[]))
        .expect("title");
    assert!(title.starts_with("Updated Spammers on"));
}

#[test]
fn missing_template_dir_falls_back_to_embedded() {
    let dir = TempDir::new().expect("tmp");
    let missing = dir.path().join("nope");
    let renderer = Renderer::with_template_dir(Some(&missing)).expect("renderer");
    let out = renderer
        .render(Document::Artifact, &ctx(&["x.org"], &[]))
        .expect("render");
    assert_eq!(out, "@x.org\n");
}
