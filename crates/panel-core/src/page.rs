//! Control panel page generator.
//!
//! [`render`] is a pure function of the registry and a status snapshot. It
//! never fails: a dangling or unresolved id becomes an error block and the
//! rest of the page is still rendered.

use crate::html::Element;
use crate::model::{ParamDecl, ParamDomain, ParamType, PresentationType};
use crate::registry::{FunctionRegistry, FunctionSpec};
use crate::status::PanelStatus;

/// How often show panels re-fetch `/show/<id>`.
pub const SHOW_POLL_MS: u32 = 700;

const STYLE: &str = "\
body{font-family:sans-serif;margin:1em;max-width:40em}\
.status-bar{padding:.5em;background:#eef;margin-bottom:1em}\
.function-block{border:1px solid #ccc;border-radius:4px;padding:.5em 1em;margin-bottom:1em}\
.error-block{border-color:#c33;background:#fee}\
.show-output{font-family:monospace;white-space:pre-wrap}\
.result{width:100%;min-height:4em}\
label{display:block;margin-top:.5em}";

fn script() -> String {
    format!(
        "const POLL_MS={poll};\
document.querySelectorAll('.show-output').forEach(function(el){{\
var poll=function(){{fetch('/show/'+encodeURIComponent(el.dataset.fn))\
.then(function(r){{return r.text();}})\
.then(function(t){{el.textContent=t;}})\
.catch(function(){{}});}};\
poll();setInterval(poll,POLL_MS);}});\
document.querySelectorAll('.rut-form').forEach(function(form){{\
form.addEventListener('submit',function(ev){{ev.preventDefault();\
var out=document.getElementById(form.dataset.fn+'_result');out.value='...';\
fetch(form.action,{{method:'POST',body:new URLSearchParams(new FormData(form))}})\
.then(function(r){{return r.text();}})\
.then(function(t){{out.value=t;}})\
.catch(function(e){{out.value=String(e);}});}});}});\
document.querySelectorAll('input[type=range]').forEach(function(input){{\
var label=document.getElementById(input.dataset.label);\
input.addEventListener('input',function(){{label.textContent=input.value;}});}});",
        poll = SHOW_POLL_MS
    )
}

/// Render the full panel page.
pub fn render(registry: &FunctionRegistry, status: &PanelStatus) -> String {
    let mut body = Element::new("body")
        .child(Element::new("h1").text("Control Panel"))
        .child(status_bar(status));

    for (id, spec) in registry.ordered() {
        let block = match spec {
            None => error_block(id, "declared in function_list but missing from functions"),
            Some(spec) if !spec.is_resolved() => {
                error_block(id, "no implementation is registered for this function")
            }
            Some(spec) => function_block(spec),
        };
        body = body.child(block);
    }

    let head = Element::new("head")
        .child(Element::new("meta").attr("charset", "utf-8"))
        .child(
            Element::new("meta")
                .attr("name", "viewport")
                .attr("content", "width=device-width, initial-scale=1"),
        )
        .child(Element::new("title").text("Control Panel"))
        .child(Element::new("style").raw(STYLE));

    let html = Element::new("html")
        .child(head)
        .child(body.child(Element::new("script").raw(script())));

    format!("<!DOCTYPE html>{}", html.render())
}

fn status_bar(status: &PanelStatus) -> Element {
    let mut bar = Element::new("div")
        .class("status-bar")
        .id("status_bar")
        .child(Element::new("div").text(format!("Station: {}", status.connection.describe())));
    if let Some(ap) = &status.ap_ssid {
        bar = bar.child(Element::new("div").text(format!("Access point: {}", ap)));
    }
    bar
}

fn error_block(id: &str, reason: &str) -> Element {
    Element::new("div")
        .class("function-block error-block")
        .id(format!("{}_block", id))
        .child(Element::new("h2").text(id))
        .child(Element::new("p").text(format!("Unavailable: {}", reason)))
}

fn function_block(spec: &FunctionSpec) -> Element {
    let mut block = Element::new("div")
        .class("function-block")
        .id(format!("{}_block", spec.id))
        .child(Element::new("h2").text(spec.name.as_str()));
    if !spec.doc.is_empty() {
        block = block.child(Element::new("p").class("doc").text(spec.doc.as_str()));
    }

    match spec.kind {
        PresentationType::Show => block.child(
            Element::new("div")
                .class("show-output")
                .id(format!("{}_output", spec.id))
                .attr("data-fn", spec.id.as_str())
                .text("..."),
        ),
        PresentationType::Function => block.child(
            form(spec).child(Element::new("button").attr("type", "submit").text("Run")),
        ),
        PresentationType::Rut => block
            .child(
                form(spec)
                    .class("rut-form")
                    .attr("data-fn", spec.id.as_str())
                    .child(Element::new("button").attr("type", "submit").text("Run")),
            )
            .child(
                Element::new("textarea")
                    .id(format!("{}_result", spec.id))
                    .class("result")
                    .flag("readonly"),
            ),
    }
}

fn form(spec: &FunctionSpec) -> Element {
    Element::new("form")
        .attr("method", "post")
        .attr("action", format!("/{}", spec.id))
        .children(
            spec.parameters
                .iter()
                .enumerate()
                .map(|(i, param)| param_field(&spec.id, i, param)),
        )
}

fn param_field(fn_id: &str, index: usize, param: &ParamDecl) -> Element {
    let name = format!("arg{}", index);
    let input_id = format!("{}_arg{}", fn_id, index);
    let label = Element::new("label")
        .attr("for", input_id.as_str())
        .text(format!("{} ({})", param.name, param.param_type.as_str()));

    let control = match param.domain() {
        ParamDomain::Range { min, max } => {
            let step = if param.param_type == ParamType::Int { "1" } else { "0.1" };
            let value_id = format!("{}_value", input_id);
            return Element::new("div")
                .class("param")
                .child(label)
                .child(
                    Element::new("input")
                        .attr("type", "range")
                        .attr("name", name)
                        .id(input_id)
                        .attr("min", min.to_string())
                        .attr("max", max.to_string())
                        .attr("step", step)
                        .attr("value", min.to_string())
                        .attr("data-label", value_id.as_str()),
                )
                .child(Element::new("span").id(value_id).text(min.to_string()));
        }
        ParamDomain::Choices(choices) => Element::new("select")
            .attr("name", name)
            .id(input_id)
            .children(
                choices
                    .into_iter()
                    .map(|c| Element::new("option").attr("value", c.as_str()).text(c)),
            ),
        ParamDomain::Free => Element::new("input")
            .attr("type", "text")
            .attr("name", name)
            .id(input_id),
    };

    Element::new("div").class("param").child(label).child(control)
}
