//! URL rewriting for proxied responses.
//!
//! Pages served through `/dev-server/proxy/<port>/` still reference their
//! assets and APIs by absolute path (`/static/app.js`, `fetch('/api')`) or by
//! `http://localhost:<port>`. These helpers redirect such references back
//! through the proxy. HTML rewriting is pattern based and best-effort: string
//! literals that merely look like absolute paths are rewritten too.

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Mount point of the reverse proxy.
pub const PROXY_PREFIX: &str = "/dev-server/proxy";

/// `http://localhost:3000/x`, `https://127.0.0.1:5173`, `http://0.0.0.0:8080/`
static LOCAL_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r#"(?i)https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0):(\d{1,5})(/[^"'`\s<>)]*)?"#)
});

/// A whole `Location` value in the same shape.
static LOCATION_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r"(?i)^https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0):(\d{1,5})(/.*)?$")
});

/// Quoted absolute path: `"/x"`, `'/api/x'`, `` `/a` ``, `"/"`.
static QUOTED_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r#"(["'`])/([^/"'`\s<>][^"'`\s<>]*)?(["'`])"#)
});

/// Unquoted attribute value: `src=/x.js`.
static UNQUOTED_ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r"(?i)(\s(?:href|src|action|poster)=)/([^/\s>][^\s>]*)?")
});

static HEAD_OPEN_REGEX: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"(?i)<head(?:\s[^>]*)?>"));

static HTML_OPEN_REGEX: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"(?i)<html(?:\s[^>]*)?>"));

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Covered by `test_patterns_compile`
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

/// Client-side patch for URLs built at runtime. `__PREFIX__` is replaced
/// with the proxy prefix for the port.
const INTERCEPT_SCRIPT: &str = r#"<script data-openswe-proxy>(function(){
var P='__PREFIX__';
function fix(u){if(typeof u!=='string')return u;if(u.charAt(0)==='/'&&u.charAt(1)!=='/'&&u!==P&&u.indexOf(P+'/')!==0){return P+u;}return u;}
var f=window.fetch;
if(f){window.fetch=function(i,o){if(typeof i==='string'){i=fix(i);}else if(typeof Request!=='undefined'&&i instanceof Request){var u=new URL(i.url);if(u.origin===location.origin&&u.pathname.indexOf(P+'/')!==0){i=new Request(P+u.pathname+u.search+u.hash,i);}}return f.call(this,i,o);};}
if(window.XMLHttpRequest){var x=XMLHttpRequest.prototype.open;XMLHttpRequest.prototype.open=function(m,u){arguments[1]=fix(u);return x.apply(this,arguments);};}
var s=Element.prototype.setAttribute;
Element.prototype.setAttribute=function(n,v){var k=String(n).toLowerCase();if(k==='src'||k==='href'||k==='action'){v=fix(v);}return s.call(this,n,v);};
var c=document.createElement;
document.createElement=function(){var e=c.apply(document,arguments);['src','href'].forEach(function(a){var d=Object.getOwnPropertyDescriptor(Object.getPrototypeOf(e),a);if(d&&d.set&&d.get){Object.defineProperty(e,a,{configurable:true,get:function(){return d.get.call(this);},set:function(v){d.set.call(this,fix(v));}});}});return e;};
})();</script>"#;

/// Proxy prefix for a container port, without a trailing slash.
pub fn proxy_prefix(port: u16) -> String {
    format!("{PROXY_PREFIX}/{port}")
}

fn already_proxied(path: &str) -> bool {
    path.starts_with(&PROXY_PREFIX[1..])
}

/// Rewrite a `Location` header so redirects stay inside the proxy.
///
/// Local URLs at `container_port` or `host_port` and absolute paths are
/// rewritten; anything else (other hosts and ports, protocol-relative and
/// relative values) is returned unchanged.
pub fn rewrite_location(value: &str, container_port: u16, host_port: u16) -> String {
    let prefix = proxy_prefix(container_port);

    if let Some(caps) = LOCATION_URL_REGEX.captures(value) {
        let port = caps[1].parse::<u16>().ok();
        if port == Some(container_port) || port == Some(host_port) {
            let path = caps.get(2).map_or("/", |m| m.as_str());
            return format!("{prefix}{path}");
        }
        return value.to_string();
    }

    if value.starts_with('/') && !value.starts_with("//") && !already_proxied(&value[1..]) {
        return format!("{prefix}{value}");
    }

    value.to_string()
}

/// Rewrite an HTML document served for `port`.
///
/// Absolute paths in attributes and string literals and same-port local URLs
/// are pointed at the proxy, then a `<base>` tag and the interception script
/// are inserted right after `<head>`.
pub fn rewrite_html(html: &str, port: u16) -> String {
    let prefix = proxy_prefix(port);

    let html = LOCAL_URL_REGEX.replace_all(html, |caps: &Captures| {
        if caps[1].parse::<u16>().ok() == Some(port) {
            let path = caps.get(2).map_or("/", |m| m.as_str());
            format!("{prefix}{path}")
        } else {
            caps[0].to_string()
        }
    });

    let html = QUOTED_PATH_REGEX.replace_all(&html, |caps: &Captures| {
        let rest = caps.get(2).map_or("", |m| m.as_str());
        if caps[1] != caps[3] || already_proxied(rest) {
            caps[0].to_string()
        } else {
            format!("{}{prefix}/{rest}{}", &caps[1], &caps[3])
        }
    });

    let html = UNQUOTED_ATTR_REGEX.replace_all(&html, |caps: &Captures| {
        let rest = caps.get(2).map_or("", |m| m.as_str());
        if already_proxied(rest) {
            caps[0].to_string()
        } else {
            format!("{}{prefix}/{rest}", &caps[1])
        }
    });

    inject_head(&html, &prefix)
}

fn inject_head(html: &str, prefix: &str) -> String {
    let injection = format!(
        "<base href=\"{prefix}/\">{}",
        INTERCEPT_SCRIPT.replace("__PREFIX__", prefix)
    );

    if let Some(m) = HEAD_OPEN_REGEX.find(html) {
        return format!("{}{injection}{}", &html[..m.end()], &html[m.end()..]);
    }
    if let Some(m) = HTML_OPEN_REGEX.find(html) {
        return format!(
            "{}<head>{injection}</head>{}",
            &html[..m.end()],
            &html[m.end()..]
        );
    }
    format!("<head>{injection}</head>{html}")
}

/// Whether a `Content-Type` value denotes HTML.
pub fn is_html(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("text/html"))
        .unwrap_or(false)
}
