use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_V1_PREFIX))
}
pub fn auth_signup(base: &str) -> String {
    base_join(base, &format!("{}/auth/signup", API_V1_PREFIX))
}
pub fn me(base: &str) -> String {
    base_join(base, &format!("{}/me", API_V1_PREFIX))
}
pub fn mixes(base: &str) -> String {
    base_join(base, &format!("{}/mixes", API_V1_PREFIX))
}
pub fn mixes_by_owner(base: &str, owner_id: &str) -> String {
    format!("{}?owner_id={}", mixes(base), enc(owner_id))
}
pub fn mixes_from_template(base: &str) -> String {
    base_join(base, &format!("{}/mixes/from-template", API_V1_PREFIX))
}
pub fn mixes_stream(base: &str, mix_id: Option<&str>) -> String {
    let url = base_join(base, &format!("{}/mixes/stream", API_V1_PREFIX));
    match mix_id {
        Some(id) => format!("{}?mix_id={}", url, enc(id)),
        None => url,
    }
}
pub fn mix(base: &str, mix_id: &str) -> String {
    base_join(base, &format!("{}/mixes/{}", API_V1_PREFIX, enc(mix_id)))
}
pub fn mix_advance(base: &str, mix_id: &str) -> String {
    base_join(
        base,
        &format!("{}/mixes/{}/advance", API_V1_PREFIX, enc(mix_id)),
    )
}
pub fn mix_save_template(base: &str, mix_id: &str) -> String {
    base_join(
        base,
        &format!("{}/mixes/{}/template", API_V1_PREFIX, enc(mix_id)),
    )
}
pub fn templates(base: &str) -> String {
    base_join(base, &format!("{}/templates", API_V1_PREFIX))
}
pub fn template(base: &str, template_id: &str) -> String {
    base_join(
        base,
        &format!("{}/templates/{}", API_V1_PREFIX, enc(template_id)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_and_encodes() {
        assert_eq!(
            mix_advance("http://h:1/", "a b"),
            "http://h:1/api/v1/mixes/a%20b/advance"
        );
        assert_eq!(
            mixes_stream("http://h", Some("m/1")),
            "http://h/api/v1/mixes/stream?mix_id=m%2F1"
        );
        assert_eq!(mixes_stream("http://h", None), "http://h/api/v1/mixes/stream");
        assert_eq!(
            mixes_by_owner("http://h", "u@x"),
            "http://h/api/v1/mixes?owner_id=u%40x"
        );
    }
}
