//! End-to-end rendering through the public API

use std::sync::Arc;

use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use serde_json::json;

use trellis::{
    context_from_json, render_str, CallError, Context, HostObject, RenderError, Value,
};

fn render(text: &str, data: serde_json::Value) -> String {
    render_str(text, context_from_json(data)).expect("Should render")
}

fn render_err(text: &str, data: serde_json::Value) -> RenderError {
    render_str(text, context_from_json(data)).expect_err("Should fail")
}

#[test]
fn test_interpolation() {
    let out = render("{{ name }} is {{ age }}", json!({ "name": "John", "age": 30 }));
    assert_snapshot!(out, @"John is 30");
}

#[test]
fn test_foreach_over_records() {
    let out = render(
        "@foreach(users as user){{ user.name }}@endforeach",
        json!({ "users": [{ "name": "A" }, { "name": "B" }] }),
    );
    assert_snapshot!(out, @"AB");
}

#[test]
fn test_if_else_keeps_text_after_bare_else() {
    let text = "@if(age >= 18)adult@else minor@endif";
    assert_eq!(render(text, json!({ "age": 15 })), " minor");
    assert_eq!(render(text, json!({ "age": 20 })), "adult");
}

#[test]
fn test_escaped_and_raw_output() {
    let data = json!({ "v": "<a href=\"x\">Tom & 'Jerry'</a>" });
    assert_snapshot!(
        render("{{ v }}", data.clone()),
        @"&lt;a href=&quot;x&quot;&gt;Tom &amp; &#039;Jerry&#039;&lt;/a&gt;"
    );
    assert_snapshot!(render("{{{ v }}}", data), @r#"<a href="x">Tom & 'Jerry'</a>"#);
}

#[test]
fn test_filter_chain_applies_left_to_right() {
    assert_eq!(render("{{ word|reverse|first }}", json!({ "word": "abc" })), "c");
    assert_eq!(render("{{ word|first|reverse }}", json!({ "word": "abc" })), "a");
}

#[test]
fn test_filter_arguments() {
    let data = json!({ "tags": ["rust", "web"], "missing": null, "title": "Hello World" });
    assert_eq!(render("{{ tags|join(', ') }}", data.clone()), "rust, web");
    assert_eq!(render("{{ missing|default('n/a') }}", data.clone()), "n/a");
    assert_eq!(render("{{ title|slug }}", data), "hello-world");
}

#[test]
fn test_foreach_with_inline_condition() {
    let out = render(
        "@foreach(items as item if item.active){{ item.name }}@endforeach",
        json!({ "items": [
            { "name": "A", "active": true },
            { "name": "B", "active": false },
            { "name": "C", "active": true },
        ] }),
    );
    assert_snapshot!(out, @"AC");
}

#[test]
fn test_foreach_key_value_over_map() {
    let out = render(
        "@foreach(prices as fruit => price){{ fruit }}={{ price }};@endforeach",
        json!({ "prices": { "apple": 1, "pear": 2.5 } }),
    );
    assert_snapshot!(out, @"apple=1;pear=2.5;");
}

#[test]
fn test_forelse_and_empty_collections() {
    let text = "@forelse(xs as x){{ x }}@empty\nnothing\n@endforelse";
    assert_eq!(render(text, json!({ "xs": [] })), "nothing\n");
    assert_eq!(render(text, json!({ "xs": null })), "nothing\n");
    assert_eq!(render(text, json!({ "xs": [1, 2] })), "12");
}

#[test]
fn test_nested_paths_and_indices() {
    let data = json!({ "user": { "tags": ["admin", "dev"], "profile": { "city": "Oslo" } } });
    assert_eq!(
        render("{{ user.tags[1] }} in {{ user.profile.city }}", data),
        "dev in Oslo"
    );
}

#[test]
fn test_missing_key_reads_as_empty() {
    assert_eq!(render("[{{ user.nickname }}]", json!({ "user": {} })), "[]");
}

#[test]
fn test_switch() {
    let text = "@switch(status)\n@case('draft')\nDraft\n@break\n@case('live')\nLive\n@break\n@default\nUnknown\n@endswitch";
    assert_eq!(render(text, json!({ "status": "live" })), "Live\n");
    assert_eq!(render(text, json!({ "status": "gone" })), "Unknown\n");
}

#[test]
fn test_isset_and_empty_blocks() {
    let text = "@isset(user.email)mail @endisset@empty(user.posts)no posts@endempty";
    assert_eq!(
        render(text, json!({ "user": { "email": "a@b.c", "posts": [] } })),
        "mail no posts"
    );
    assert_eq!(render(text, json!({ "user": { "posts": [1] } })), "");
}

#[test]
fn test_truthiness() {
    let text = "@if(v)yes@else no@endif";
    assert_eq!(render(text, json!({ "v": "0" })), " no");
    assert_eq!(render(text, json!({ "v": [] })), " no");
    assert_eq!(render(text, json!({ "v": 0.5 })), "yes");
}

#[test]
fn test_loose_and_strict_comparison() {
    let data = json!({ "n": 5, "s": "5" });
    assert_eq!(render("@if(n == s)eq@endif", data.clone()), "eq");
    assert_eq!(render("@if(n === s)same@else different@endif", data), " different");
}

#[test]
fn test_set_and_for() {
    let out = render(
        "@set(label = 'n')@for(i in 0 count xs){{ label }}{{ i }} @endfor",
        json!({ "xs": ["a", "b", "c"] }),
    );
    assert_snapshot!(out, @"n0 n1 n2 ");
}

#[test]
fn test_comments_produce_nothing() {
    assert_eq!(render("a{* hidden {{ x }} *}b", json!({})), "ab");
}

#[test]
fn test_escaped_at_sign() {
    assert_eq!(render("mail me@@example.com", json!({})), "mail me@example.com");
}

struct Post {
    title: String,
    words: usize,
}

impl HostObject for Post {
    fn type_name(&self) -> &str {
        "Post"
    }

    fn field(&self, name: &str) -> Option<Value> {
        (name == "title").then(|| Value::from(self.title.as_str()))
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "getWordCount" | "summary")
    }

    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, CallError>> {
        match name {
            "getWordCount" => Some(Ok(Value::from(self.words))),
            "summary" => Some(Ok(Value::from(format!(
                "{} ({})",
                self.title,
                args.first().map(Value::to_text).unwrap_or_default()
            )))),
            _ => None,
        }
    }

    fn display(&self) -> Option<String> {
        Some(format!("Post: {}", self.title))
    }
}

#[test]
fn test_host_object_members() {
    let post: Arc<dyn HostObject> = Arc::new(Post {
        title: "Hello".to_string(),
        words: 420,
    });
    let mut data = Context::new();
    data.insert("post".to_string(), Value::Object(post));

    let out = render_str(
        "{{ post }} / {{ post.title }} / {{ post.wordCount }} / {{ post.summary('draft') }}",
        data.clone(),
    )
    .unwrap();
    assert_snapshot!(out, @"Post: Hello / Hello / 420 / Hello (draft)");

    let err = render_str("{{ post.author }}", data).unwrap_err();
    assert!(matches!(err, RenderError::Compile { .. }), "{err:?}");
}

#[test]
fn test_undefined_variable() {
    assert_snapshot!(render_err("{{ ghost }}", json!({})), @"undefined variable `ghost`");
}

#[test]
fn test_unknown_filter_is_a_compile_error() {
    assert_snapshot!(
        render_err("{{ x|shout }}", json!({ "x": 1 })),
        @"failed to compile `inline`: unknown filter `shout` in {{ x|shout }}"
    );
}

#[test]
fn test_iterating_a_scalar_is_a_type_error() {
    assert_snapshot!(
        render_err("@foreach(n as x){{ x }}@endforeach", json!({ "n": 3 })),
        @"@foreach: expected list or map, got int"
    );
}

#[test]
fn test_printing_a_list_is_a_type_error() {
    assert_snapshot!(
        render_err("{{ xs }}", json!({ "xs": [1] })),
        @"{{ }}: expected printable value, got list"
    );
}
