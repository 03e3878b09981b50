//! C backend. Emits a header and an implementation file that build against
//! libevent's `evtag` functions.

use crate::{
    compiler::Generated,
    types::{Entry, EntryKind, Ownership, Schema, Struct},
    utils::{guard_name, indent},
};
use std::path::Path;

const GENERATOR: &str = concat!("tlvgen/", env!("CARGO_PKG_VERSION"));

/// Generates `<stem>.gen.h` and `<stem>.gen.c` contents for `schema`.
pub fn compile_schema_to_c(schema: &Schema, source_name: &str) -> Generated {
    let mut header = header_preamble(source_name);

    // Forward declarations let structs reference each other in any order.
    for strukt in &schema.structs {
        header.push_str(&format!("struct {};\n", strukt.name));
    }
    header.push('\n');

    for strukt in &schema.structs {
        header.push_str(&print_tags(strukt));
        header.push_str(&print_declaration(strukt));
    }
    header.push_str(&format!("#endif  /* {} */\n", guard_name(source_name)));

    let mut implementation = body_preamble(schema, source_name);
    for strukt in &schema.structs {
        implementation.push_str(&print_code(strukt));
    }

    Generated {
        declarations: header,
        implementation,
    }
}

fn header_preamble(source_name: &str) -> String {
    let guard = guard_name(source_name);
    format!(
        "/*
 * Automatically generated from {source_name}
 */

#ifndef {guard}
#define {guard}

#define EVTAG_HAS(msg, member) ((msg)->member##_set == 1)
#define EVTAG_ASSIGN(msg, member, args...) (*(msg)->member##_assign)(msg, ## args)
#define EVTAG_GET(msg, member, args...) (*(msg)->member##_get)(msg, ## args)
#define EVTAG_ADD(msg, member) (*(msg)->member##_add)(msg)
#define EVTAG_LEN(msg, member) ((msg)->member##_length)

"
    )
}

fn body_preamble(schema: &Schema, source_name: &str) -> String {
    let mut pre = format!(
        "/*
 * Automatically generated from {source_name}
 * by {GENERATOR}.  DO NOT EDIT THIS FILE.
 */

#include <sys/types.h>
#include <sys/time.h>
#include <stdlib.h>
#include <string.h>
#include <assert.h>
#include <event.h>

"
    );
    for directive in &schema.directives {
        pre.push_str(directive);
        pre.push('\n');
    }
    pre.push_str(&format!("\n#include \"{}\"\n\n", header_file_name(source_name)));
    pre.push_str(
        "void event_err(int eval, const char *fmt, ...);
void event_warn(const char *fmt, ...);
void event_errx(int eval, const char *fmt, ...);
void event_warnx(const char *fmt, ...);

",
    );
    pre
}

/// File name the implementation uses to include its header.
fn header_file_name(source_name: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(source_name);
    format!("{}.gen.h", stem)
}

fn print_tags(strukt: &Struct) -> String {
    let mut out = format!("/* Tag definition for {} */\nenum {}_ {{\n", strukt.name, strukt.name.to_lowercase());
    for entry in &strukt.entries {
        out.push_str(&format!("  {}={},\n", strukt.tag_name(entry), entry.tag));
    }
    out.push_str(&format!("  {}={}\n}};\n\n", strukt.max_tags_name(), strukt.max_tags()));
    out
}

fn print_declaration(strukt: &Struct) -> String {
    let name = &strukt.name;
    let mut out = format!("/* Structure declaration for {name} */\nstruct {name} {{\n");
    for entry in &strukt.entries {
        let c = CEntry::new(strukt, entry);
        let mut dcl = c.declaration();
        dcl.push_str(&c.assign_signature(&format!("(*{}_assign)", entry.name)));
        dcl.push_str(&c.get_signature(&format!("(*{}_get)", entry.name)));
        if let Some(add) = c.add_signature(&format!("(*{}_add)", entry.name)) {
            dcl.push_str(&add);
        }
        out.push_str(&indent(&dcl, "  "));
    }
    out.push('\n');
    for entry in &strukt.entries {
        out.push_str(&format!("  ev_uint8_t {}_set;\n", entry.name));
    }
    out.push_str("};\n\n");

    out.push_str(&format!(
        "struct {name} *{name}_new(void);
void {name}_free(struct {name} *);
void {name}_clear(struct {name} *);
void {name}_marshal(struct evbuffer *, const struct {name} *);
int {name}_unmarshal(struct {name} *, struct evbuffer *);
int {name}_complete(struct {name} *);
void evtag_marshal_{name}(struct evbuffer *, ev_uint32_t, const struct {name} *);
int evtag_unmarshal_{name}(struct evbuffer *, ev_uint32_t, struct {name} *);
"
    ));

    for entry in &strukt.entries {
        let c = CEntry::new(strukt, entry);
        out.push_str(&c.assign_signature(&c.func_name("assign")));
        out.push_str(&c.get_signature(&c.func_name("get")));
        if let Some(add) = c.add_signature(&c.func_name("add")) {
            out.push_str(&add);
        }
    }
    out.push_str(&format!("/* --- {name} done --- */\n\n"));
    out
}

fn print_code(strukt: &Struct) -> String {
    let name = &strukt.name;
    let entries: Vec<CEntry<'_>> = strukt.entries.iter().map(|e| CEntry::new(strukt, e)).collect();
    let mut out = format!("/*\n * Implementation of {name}\n */\n\n");

    // Creation
    out.push_str(&format!(
        "struct {name} *
{name}_new(void)
{{
  struct {name} *tmp;
  if ((tmp = malloc(sizeof(struct {name}))) == NULL) {{
    event_warn(\"%s: malloc\", __func__);
    return (NULL);
  }}
"
    ));
    for c in &entries {
        out.push_str(&indent(&c.code_new("tmp"), "  "));
        out.push_str(&format!("  tmp->{}_set = 0;\n\n", c.entry.name));
    }
    out.push_str("  return (tmp);\n}\n\n");

    // Adding, assigning, getting
    for c in &entries {
        if let Some(add) = c.code_add() {
            out.push_str(&add);
            out.push('\n');
        }
    }
    for c in &entries {
        out.push_str(&c.code_assign());
        out.push('\n');
    }
    for c in &entries {
        out.push_str(&c.code_get());
        out.push('\n');
    }

    // Clearing
    out.push_str(&format!("void\n{name}_clear(struct {name} *tmp)\n{{\n"));
    for c in &entries {
        out.push_str(&indent(&c.code_clear("tmp"), "  "));
    }
    out.push_str("}\n\n");

    // Freeing
    out.push_str(&format!("void\n{name}_free(struct {name} *tmp)\n{{\n"));
    for c in &entries {
        out.push_str(&indent(&c.code_free("tmp"), "  "));
    }
    out.push_str("  free(tmp);\n}\n\n");

    // Marshaling
    out.push_str(&format!(
        "void\n{name}_marshal(struct evbuffer *evbuf, const struct {name} *tmp)\n{{\n"
    ));
    for c in &entries {
        let code = c.code_marshal("evbuf", &strukt.tag_name(c.entry), "tmp");
        if c.entry.optional {
            out.push_str(&format!("  if (tmp->{}_set) {{\n", c.entry.name));
            out.push_str(&indent(&code, "    "));
            out.push_str("  }\n");
        } else {
            out.push_str(&indent(&code, "  "));
        }
    }
    out.push_str("}\n\n");

    // Unmarshaling
    out.push_str(&format!(
        "int
{name}_unmarshal(struct {name} *tmp, struct evbuffer *evbuf)
{{
  ev_uint32_t tag;
  while (EVBUFFER_LENGTH(evbuf) > 0) {{
    if (evtag_peek(evbuf, &tag) == -1)
      return (-1);
    switch (tag) {{

"
    ));
    for c in &entries {
        let field = &c.entry.name;
        out.push_str(&format!("      case {}:\n", strukt.tag_name(c.entry)));
        if !c.entry.is_array() {
            out.push_str(&format!("        if (tmp->{field}_set)\n          return (-1);\n"));
        }
        out.push_str(&indent(&c.code_unmarshal("evbuf", &strukt.tag_name(c.entry), "tmp"), "        "));
        out.push_str(&format!("        tmp->{field}_set = 1;\n        break;\n\n"));
    }
    out.push_str(&format!(
        "      default:
        return -1;
    }}
  }}

  if ({name}_complete(tmp) == -1)
    return (-1);
  return (0);
}}

"
    ));

    // Checking if a structure has all the required data
    out.push_str(&format!("int\n{name}_complete(struct {name} *msg)\n{{\n"));
    for c in &entries {
        out.push_str(&indent(&c.code_complete("msg"), "  "));
    }
    out.push_str("  return (0);\n}\n\n");

    // Whole-message framing
    out.push_str(&format!(
        "int
evtag_unmarshal_{name}(struct evbuffer *evbuf, ev_uint32_t need_tag, struct {name} *msg)
{{
  ev_uint32_t tag;
  int res = -1;

  struct evbuffer *tmp = evbuffer_new();
  if (tmp == NULL)
    return (-1);

  if (evtag_unmarshal(evbuf, &tag, tmp) == -1 || tag != need_tag)
    goto error;

  if ({name}_unmarshal(msg, tmp) == -1)
    goto error;

  res = 0;

 error:
  evbuffer_free(tmp);
  return (res);
}}

void
evtag_marshal_{name}(struct evbuffer *evbuf, ev_uint32_t tag, const struct {name} *msg)
{{
  struct evbuffer *_buf = evbuffer_new();
  assert(_buf != NULL);
  evbuffer_drain(_buf, -1);
  {name}_marshal(_buf, msg);
  evtag_marshal(evbuf, tag, EVBUFFER_DATA(_buf), EVBUFFER_LENGTH(_buf));
  evbuffer_free(_buf);
}}

"
    ));
    out
}

/// One entry as seen by the C emitter.
struct CEntry<'a> {
    owner: &'a str,
    entry: &'a Entry,
}

impl<'a> CEntry<'a> {
    fn new(owner: &'a Struct, entry: &'a Entry) -> Self {
        CEntry {
            owner: &owner.name,
            entry,
        }
    }

    fn func_name(&self, op: &str) -> String {
        format!("{}_{}_{}", self.owner, self.entry.name, op)
    }

    fn target(&self) -> &'a str {
        self.entry.kind.struct_target().unwrap_or_default()
    }

    /// Storage members inside the struct declaration.
    fn declaration(&self) -> String {
        let n = &self.entry.name;
        match &self.entry.kind {
            EntryKind::FixedBytes { length } => format!("ev_uint8_t {n}_data[{length}];\n"),
            EntryKind::VarBytes => format!("ev_uint8_t *{n}_data;\nev_uint32_t {n}_length;\n"),
            EntryKind::Int => format!("ev_uint32_t {n}_data;\n"),
            EntryKind::Text => format!("char *{n}_data;\n"),
            EntryKind::StructRef { target } => format!("struct {target} *{n}_data;\n"),
            EntryKind::Array { .. } => format!("struct {} **{n}_data;\nint {n}_length;\n", self.target()),
        }
    }

    fn assign_signature(&self, func: &str) -> String {
        let s = self.owner;
        let t = self.target();
        match &self.entry.kind {
            EntryKind::FixedBytes { .. } => format!("int {func}(struct {s} *, const ev_uint8_t *);\n"),
            EntryKind::VarBytes => format!("int {func}(struct {s} *, const ev_uint8_t *, ev_uint32_t);\n"),
            EntryKind::Int => format!("int {func}(struct {s} *, const ev_uint32_t);\n"),
            EntryKind::Text => format!("int {func}(struct {s} *, const char *);\n"),
            EntryKind::StructRef { .. } => format!("int {func}(struct {s} *, const struct {t} *);\n"),
            EntryKind::Array { .. } => format!("int {func}(struct {s} *, int, const struct {t} *);\n"),
        }
    }

    fn get_signature(&self, func: &str) -> String {
        let s = self.owner;
        let t = self.target();
        match &self.entry.kind {
            EntryKind::FixedBytes { .. } => format!("int {func}(struct {s} *, ev_uint8_t **);\n"),
            EntryKind::VarBytes => format!("int {func}(struct {s} *, ev_uint8_t **, ev_uint32_t *);\n"),
            EntryKind::Int => format!("int {func}(struct {s} *, ev_uint32_t *);\n"),
            EntryKind::Text => format!("int {func}(struct {s} *, char **);\n"),
            EntryKind::StructRef { .. } => format!("int {func}(struct {s} *, struct {t} **);\n"),
            EntryKind::Array { .. } => format!("int {func}(struct {s} *, int, struct {t} **);\n"),
        }
    }

    fn add_signature(&self, func: &str) -> Option<String> {
        self.entry
            .is_array()
            .then(|| format!("struct {} *{func}(struct {} *);\n", self.target(), self.owner))
    }

    fn code_new(&self, var: &str) -> String {
        let n = &self.entry.name;
        let mut code = match self.entry.kind.ownership() {
            Ownership::Inline => format!("memset(&{var}->{n}_data, 0, sizeof({var}->{n}_data));\n"),
            Ownership::Buffer | Ownership::Sequence => {
                format!("{var}->{n}_data = NULL;\n{var}->{n}_length = 0;\n")
            }
            Ownership::Text | Ownership::Struct => format!("{var}->{n}_data = NULL;\n"),
        };
        code.push_str(&format!("{var}->{n}_assign = {};\n", self.func_name("assign")));
        code.push_str(&format!("{var}->{n}_get = {};\n", self.func_name("get")));
        if self.entry.is_array() {
            code.push_str(&format!("{var}->{n}_add = {};\n", self.func_name("add")));
        }
        code
    }

    fn code_clear(&self, var: &str) -> String {
        let n = &self.entry.name;
        match self.entry.kind.ownership() {
            Ownership::Inline => {
                format!("{var}->{n}_set = 0;\nmemset(&{var}->{n}_data, 0, sizeof({var}->{n}_data));\n")
            }
            Ownership::Buffer => format!(
                "if ({var}->{n}_data != NULL) {{
  free({var}->{n}_data);
  {var}->{n}_data = NULL;
  {var}->{n}_length = 0;
  {var}->{n}_set = 0;
}}
"
            ),
            Ownership::Text => format!(
                "if ({var}->{n}_data != NULL) {{
  free({var}->{n}_data);
  {var}->{n}_data = NULL;
  {var}->{n}_set = 0;
}}
"
            ),
            Ownership::Struct => format!(
                "if ({var}->{n}_data != NULL) {{
  {t}_free({var}->{n}_data);
  {var}->{n}_data = NULL;
  {var}->{n}_set = 0;
}}
",
                t = self.target()
            ),
            Ownership::Sequence => format!(
                "if ({var}->{n}_data != NULL) {{
  int i;
  for (i = 0; i < {var}->{n}_length; ++i) {{
    {t}_free({var}->{n}_data[i]);
  }}
  free({var}->{n}_data);
  {var}->{n}_data = NULL;
  {var}->{n}_set = 0;
  {var}->{n}_length = 0;
}}
",
                t = self.target()
            ),
        }
    }

    fn code_free(&self, var: &str) -> String {
        let n = &self.entry.name;
        match self.entry.kind.ownership() {
            Ownership::Inline => String::new(),
            Ownership::Buffer | Ownership::Text => {
                format!("if ({var}->{n}_data != NULL)\n    free({var}->{n}_data);\n")
            }
            Ownership::Struct => format!(
                "if ({var}->{n}_data != NULL)\n    {}_free({var}->{n}_data);\n",
                self.target()
            ),
            Ownership::Sequence => format!(
                "if ({var}->{n}_data != NULL) {{
  int i;
  for (i = 0; i < {var}->{n}_length; ++i) {{
    {t}_free({var}->{n}_data[i]);
    {var}->{n}_data[i] = NULL;
  }}
  free({var}->{n}_data);
  {var}->{n}_data = NULL;
  {var}->{n}_length = 0;
}}
",
                t = self.target()
            ),
        }
    }

    fn code_assign(&self) -> String {
        let s = self.owner;
        let n = &self.entry.name;
        let t = self.target();
        match &self.entry.kind {
            EntryKind::Int => format!(
                "int
{s}_{n}_assign(struct {s} *msg, const ev_uint32_t value)
{{
  msg->{n}_set = 1;
  msg->{n}_data = value;
  return (0);
}}
"
            ),
            EntryKind::FixedBytes { length } => format!(
                "int
{s}_{n}_assign(struct {s} *msg, const ev_uint8_t *value)
{{
  msg->{n}_set = 1;
  memcpy(msg->{n}_data, value, {length});
  return (0);
}}
"
            ),
            EntryKind::VarBytes => format!(
                "int
{s}_{n}_assign(struct {s} *msg, const ev_uint8_t *value, ev_uint32_t len)
{{
  ev_uint8_t *data;
  if ((data = malloc(len > 0 ? len : 1)) == NULL)
    return (-1);
  memcpy(data, value, len);
  if (msg->{n}_data != NULL)
    free(msg->{n}_data);
  msg->{n}_data = data;
  msg->{n}_length = len;
  msg->{n}_set = 1;
  return (0);
}}
"
            ),
            EntryKind::Text => format!(
                "int
{s}_{n}_assign(struct {s} *msg, const char *value)
{{
  char *data;
  if ((data = strdup(value)) == NULL)
    return (-1);
  if (msg->{n}_data != NULL)
    free(msg->{n}_data);
  msg->{n}_data = data;
  msg->{n}_set = 1;
  return (0);
}}
"
            ),
            EntryKind::StructRef { .. } => format!(
                "int
{s}_{n}_assign(struct {s} *msg, const struct {t} *value)
{{
  struct evbuffer *tmp = NULL;
  if (msg->{n}_set) {{
    {t}_clear(msg->{n}_data);
    msg->{n}_set = 0;
  }} else {{
    msg->{n}_data = {t}_new();
    if (msg->{n}_data == NULL) {{
      event_warn(\"%s: {t}_new()\", __func__);
      goto error;
    }}
  }}
  if ((tmp = evbuffer_new()) == NULL) {{
    event_warn(\"%s: evbuffer_new()\", __func__);
    goto error;
  }}
  {t}_marshal(tmp, value);
  if ({t}_unmarshal(msg->{n}_data, tmp) == -1) {{
    event_warnx(\"%s: {t}_unmarshal\", __func__);
    goto error;
  }}
  msg->{n}_set = 1;
  evbuffer_free(tmp);
  return (0);
 error:
  if (tmp != NULL)
    evbuffer_free(tmp);
  if (msg->{n}_data != NULL) {{
    {t}_free(msg->{n}_data);
    msg->{n}_data = NULL;
  }}
  return (-1);
}}
"
            ),
            EntryKind::Array { .. } => format!(
                "int
{s}_{n}_assign(struct {s} *msg, int off, const struct {t} *value)
{{
  struct evbuffer *tmp = NULL;
  if (msg->{n}_set != 1)
    return (-1);
  if (off < 0 || off >= msg->{n}_length)
    return (-1);

  {t}_clear(msg->{n}_data[off]);
  if ((tmp = evbuffer_new()) == NULL) {{
    event_warn(\"%s: evbuffer_new()\", __func__);
    goto error;
  }}
  {t}_marshal(tmp, value);
  if ({t}_unmarshal(msg->{n}_data[off], tmp) == -1) {{
    event_warnx(\"%s: {t}_unmarshal\", __func__);
    goto error;
  }}
  evbuffer_free(tmp);
  return (0);
 error:
  if (tmp != NULL)
    evbuffer_free(tmp);
  {t}_clear(msg->{n}_data[off]);
  return (-1);
}}
"
            ),
        }
    }

    fn code_get(&self) -> String {
        let s = self.owner;
        let n = &self.entry.name;
        let t = self.target();
        match &self.entry.kind {
            EntryKind::Int => format!(
                "int
{s}_{n}_get(struct {s} *msg, ev_uint32_t *value)
{{
  if (msg->{n}_set != 1)
    return (-1);
  *value = msg->{n}_data;
  return (0);
}}
"
            ),
            EntryKind::FixedBytes { .. } => format!(
                "int
{s}_{n}_get(struct {s} *msg, ev_uint8_t **value)
{{
  if (msg->{n}_set != 1)
    return (-1);
  *value = msg->{n}_data;
  return (0);
}}
"
            ),
            EntryKind::VarBytes => format!(
                "int
{s}_{n}_get(struct {s} *msg, ev_uint8_t **value, ev_uint32_t *plen)
{{
  if (msg->{n}_set != 1)
    return (-1);
  *value = msg->{n}_data;
  *plen = msg->{n}_length;
  return (0);
}}
"
            ),
            EntryKind::Text => format!(
                "int
{s}_{n}_get(struct {s} *msg, char **value)
{{
  if (msg->{n}_set != 1)
    return (-1);
  *value = msg->{n}_data;
  return (0);
}}
"
            ),
            EntryKind::StructRef { .. } => format!(
                "int
{s}_{n}_get(struct {s} *msg, struct {t} **value)
{{
  if (msg->{n}_set != 1) {{
    msg->{n}_data = {t}_new();
    if (msg->{n}_data == NULL)
      return (-1);
    msg->{n}_set = 1;
  }}
  *value = msg->{n}_data;
  return (0);
}}
"
            ),
            EntryKind::Array { .. } => format!(
                "int
{s}_{n}_get(struct {s} *msg, int offset, struct {t} **value)
{{
  if (msg->{n}_set != 1)
    return (-1);
  if (offset < 0 || offset >= msg->{n}_length)
    return (-1);
  *value = msg->{n}_data[offset];
  return (0);
}}
"
            ),
        }
    }

    /// Growth goes through a temporary so a failed `realloc` keeps the
    /// existing elements reachable.
    fn code_add(&self) -> Option<String> {
        if !self.entry.is_array() {
            return None;
        }
        let s = self.owner;
        let n = &self.entry.name;
        let t = self.target();
        Some(format!(
            "struct {t} *
{s}_{n}_add(struct {s} *msg)
{{
  struct {t} **new_data;
  new_data = (struct {t} **)realloc(msg->{n}_data,
      (msg->{n}_length + 1) * sizeof(struct {t} *));
  if (new_data == NULL)
    return (NULL);
  msg->{n}_data = new_data;
  msg->{n}_data[msg->{n}_length] = {t}_new();
  if (msg->{n}_data[msg->{n}_length] == NULL)
    return (NULL);
  msg->{n}_set = 1;
  return (msg->{n}_data[msg->{n}_length++]);
}}
"
        ))
    }

    fn code_marshal(&self, buf: &str, tag: &str, var: &str) -> String {
        let n = &self.entry.name;
        let t = self.target();
        match &self.entry.kind {
            EntryKind::Int => format!("evtag_marshal_int({buf}, {tag}, {var}->{n}_data);\n"),
            EntryKind::FixedBytes { .. } => {
                format!("evtag_marshal({buf}, {tag}, {var}->{n}_data, sizeof({var}->{n}_data));\n")
            }
            EntryKind::VarBytes => format!("evtag_marshal({buf}, {tag}, {var}->{n}_data, {var}->{n}_length);\n"),
            EntryKind::Text => format!("evtag_marshal_string({buf}, {tag}, {var}->{n}_data);\n"),
            EntryKind::StructRef { .. } => format!("evtag_marshal_{t}({buf}, {tag}, {var}->{n}_data);\n"),
            EntryKind::Array { .. } => format!(
                "{{
  int i;
  for (i = 0; i < {var}->{n}_length; ++i) {{
    evtag_marshal_{t}({buf}, {tag}, {var}->{n}_data[i]);
  }}
}}
"
            ),
        }
    }

    fn code_unmarshal(&self, buf: &str, tag: &str, var: &str) -> String {
        let s = self.owner;
        let n = &self.entry.name;
        let t = self.target();
        let warn = format!("  event_warnx(\"%s: failed to unmarshal {n}\", __func__);\n  return (-1);\n}}\n");
        match &self.entry.kind {
            EntryKind::Int => format!("if (evtag_unmarshal_int({buf}, {tag}, &{var}->{n}_data) == -1) {{\n{warn}"),
            EntryKind::FixedBytes { .. } => format!(
                "if (evtag_unmarshal_fixed({buf}, {tag}, {var}->{n}_data, sizeof({var}->{n}_data)) == -1) {{\n{warn}"
            ),
            EntryKind::VarBytes => format!(
                "if (evtag_payload_length({buf}, &{var}->{n}_length) == -1)
  return (-1);
if ({var}->{n}_length > EVBUFFER_LENGTH({buf}))
  return (-1);
if (({var}->{n}_data = malloc({var}->{n}_length > 0 ? {var}->{n}_length : 1)) == NULL)
  return (-1);
if (evtag_unmarshal_fixed({buf}, {tag}, {var}->{n}_data, {var}->{n}_length) == -1) {{
  free({var}->{n}_data);
  {var}->{n}_data = NULL;
  {var}->{n}_length = 0;
{warn}"
            ),
            EntryKind::Text => {
                format!("if (evtag_unmarshal_string({buf}, {tag}, &{var}->{n}_data) == -1) {{\n{warn}")
            }
            EntryKind::StructRef { .. } => format!(
                "{var}->{n}_data = {t}_new();
if ({var}->{n}_data == NULL)
  return (-1);
if (evtag_unmarshal_{t}({buf}, {tag}, {var}->{n}_data) == -1) {{
  {t}_free({var}->{n}_data);
  {var}->{n}_data = NULL;
{warn}"
            ),
            EntryKind::Array { .. } => format!(
                "if ({s}_{n}_add({var}) == NULL)
  return (-1);
if (evtag_unmarshal_{t}({buf}, {tag}, {var}->{n}_data[{var}->{n}_length - 1]) == -1) {{
  --{var}->{n}_length;
  {t}_free({var}->{n}_data[{var}->{n}_length]);
  {var}->{n}_data[{var}->{n}_length] = NULL;
{warn}"
            ),
        }
    }

    fn code_complete(&self, var: &str) -> String {
        let n = &self.entry.name;
        let t = self.target();
        let mut code = String::new();
        if self.entry.is_required() {
            code.push_str(&format!("if (!{var}->{n}_set)\n  return (-1);\n"));
        }
        match &self.entry.kind {
            EntryKind::StructRef { .. } => code.push_str(&format!(
                "if ({var}->{n}_set && {t}_complete({var}->{n}_data) == -1)\n  return (-1);\n"
            )),
            EntryKind::Array { .. } => code.push_str(&format!(
                "{{
  int i;
  for (i = 0; i < {var}->{n}_length; ++i) {{
    if ({t}_complete({var}->{n}_data[i]) == -1)
      return (-1);
  }}
}}
"
            )),
            _ => {}
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_schema;

    const SCHEMA: &str = "
    #include <sys/queue.h>
    struct msg {
      int id = 1;
      optional string note = 2;
      array struct[item] items = 3;
    }
    struct item {
      int qty = 1;
      bytes digest[4] = 2;
      optional bytes blob = 3;
      optional struct[item] next = 4;
    }
    ";

    fn generated() -> Generated {
        compile_schema_to_c(&compile_schema(SCHEMA).unwrap(), "test/demo.rpc")
    }

    #[test]
    fn test_header_layout() {
        let header = generated().declarations;
        assert!(header.starts_with("/*\n * Automatically generated from test/demo.rpc\n */"));
        assert!(header.contains("#ifndef _TEST_DEMO_RPC_\n#define _TEST_DEMO_RPC_\n"));
        assert!(header.contains("struct msg;\nstruct item;\n"));
        assert!(header.contains("enum msg_ {\n  MSG_ID=1,\n  MSG_NOTE=2,\n  MSG_ITEMS=3,\n  MSG_MAX_TAGS=4\n};"));
        assert!(header.contains("  struct item **items_data;\n  int items_length;\n"));
        assert!(header.contains("  struct item *(*items_add)(struct msg *);\n"));
        assert!(header.contains("  ev_uint8_t digest_data[4];\n"));
        assert!(header.contains("int msg_items_get(struct msg *, int, struct item **);\n"));
        assert!(header.contains("int item_blob_assign(struct item *, const ev_uint8_t *, ev_uint32_t);\n"));
        assert!(header.contains("int evtag_unmarshal_item(struct evbuffer *, ev_uint32_t, struct item *);\n"));
        assert!(header.trim_end().ends_with("#endif  /* _TEST_DEMO_RPC_ */"));
    }

    #[test]
    fn test_implementation_layout() {
        let body = generated().implementation;
        assert!(body.contains("#include <event.h>\n\n#include <sys/queue.h>\n\n#include \"demo.gen.h\"\n"));
        assert!(body.contains("struct msg *\nmsg_new(void)\n{"));
        assert!(body.contains("  if (tmp->note_set) {\n    evtag_marshal_string(evbuf, MSG_NOTE, tmp->note_data);\n  }\n"));
        assert!(body.contains("      case MSG_ITEMS:\n        if (msg_items_add(tmp) == NULL)"));
        assert!(body.contains("    evtag_marshal_item(evbuf, MSG_ITEMS, tmp->items_data[i]);"));
        assert!(body.contains("int\nevtag_unmarshal_msg(struct evbuffer *evbuf, ev_uint32_t need_tag, struct msg *msg)"));
    }

    #[test]
    fn test_array_growth_uses_temporary() {
        let body = generated().implementation;
        assert!(body.contains("new_data = (struct item **)realloc(msg->items_data,"));
        assert!(body.contains("  msg->items_data = new_data;\n"));
    }

    #[test]
    fn test_failed_element_is_released() {
        let body = generated().implementation;
        assert!(body.contains("  --tmp->items_length;\n          item_free(tmp->items_data[tmp->items_length]);"));
    }

    #[test]
    fn test_failed_field_is_released() {
        let body = generated().implementation;
        assert!(body.contains(
            "      case ITEM_NEXT:\n        if (tmp->next_set)\n          return (-1);\n        tmp->next_data = item_new();"
        ));
        assert!(body.contains(
            "        if (evtag_unmarshal_item(evbuf, ITEM_NEXT, tmp->next_data) == -1) {\n          item_free(tmp->next_data);\n          tmp->next_data = NULL;\n"
        ));
        assert!(body.contains(
            "        if (evtag_unmarshal_fixed(evbuf, ITEM_BLOB, tmp->blob_data, tmp->blob_length) == -1) {\n          free(tmp->blob_data);\n          tmp->blob_data = NULL;\n          tmp->blob_length = 0;\n"
        ));
    }

    #[test]
    fn test_clear_releases_unset_allocations() {
        let body = generated().implementation;
        assert!(body.contains("  if (tmp->next_data != NULL) {\n    item_free(tmp->next_data);\n    tmp->next_data = NULL;\n    tmp->next_set = 0;\n  }\n"));
        assert!(body.contains("  if (tmp->note_data != NULL) {\n    free(tmp->note_data);"));
        assert!(body.contains("  if (tmp->items_data != NULL) {\n    int i;"));
        assert!(!body.contains("  if (tmp->blob_set == 1) {"));
    }

    #[test]
    fn test_required_struct_checks_set_flag() {
        let body = compile_schema_to_c(
            &compile_schema("struct a { struct[b] inner = 1; }\nstruct b { int x = 1; }").unwrap(),
            "a.rpc",
        )
        .implementation;
        assert!(body.contains("  if (!msg->inner_set)\n    return (-1);\n  if (msg->inner_set && b_complete(msg->inner_data) == -1)"));
    }

    #[test]
    fn test_duplicate_check_only_for_scalars() {
        let body = generated().implementation;
        assert!(body.contains("      case MSG_ID:\n        if (tmp->id_set)\n          return (-1);"));
        assert!(!body.contains("      case MSG_ITEMS:\n        if (tmp->items_set)"));
    }
}
