//! Code generation port and the template-based reference generator.

use async_trait::async_trait;
use serde_json::json;
use specforge_core::domain::{ArtifactCategory, Blueprint, Entity, FieldType, GeneratedFile};

/// Produces the files of one artifact category for a blueprint.
///
/// Implementations may call out to models or template engines; the pipeline
/// only cares about the returned files. An `Err` fails the current stage.
#[async_trait]
pub trait GeneratorPort: Send + Sync {
    async fn generate(
        &self,
        category: ArtifactCategory,
        blueprint: &Blueprint,
    ) -> anyhow::Result<Vec<GeneratedFile>>;
}

/// CRUD operations exposed per entity, in manifest order.
pub const CRUD_OPERATIONS: [(&str, &str, bool); 5] = [
    ("list", "GET", false),
    ("get", "GET", true),
    ("create", "POST", false),
    ("update", "PUT", true),
    ("delete", "DELETE", true),
];

/// Deterministic template generator.
///
/// Emits a PostgreSQL schema, a REST route manifest with handler stubs,
/// React page components, a compose file and API tests. Entities without
/// fields are skipped.
#[derive(Debug, Clone, Default)]
pub struct BlueprintGenerator;

#[async_trait]
impl GeneratorPort for BlueprintGenerator {
    async fn generate(
        &self,
        category: ArtifactCategory,
        blueprint: &Blueprint,
    ) -> anyhow::Result<Vec<GeneratedFile>> {
        let files = match category {
            ArtifactCategory::Schema => vec![schema(blueprint)],
            ArtifactCategory::Backend => backend(blueprint)?,
            ArtifactCategory::Frontend => frontend(blueprint),
            ArtifactCategory::Infrastructure => infrastructure(blueprint),
            ArtifactCategory::Tests => tests(blueprint),
            ArtifactCategory::Documentation => vec![documentation(blueprint)],
        };
        Ok(files)
    }
}

fn sql_type(column: &str, field_type: &FieldType) -> String {
    match field_type {
        FieldType::Uuid => "UUID".into(),
        FieldType::String | FieldType::Email => "VARCHAR(255)".into(),
        FieldType::Text => "TEXT".into(),
        FieldType::Integer => "BIGINT".into(),
        FieldType::Decimal => "NUMERIC(12, 2)".into(),
        FieldType::Boolean => "BOOLEAN".into(),
        FieldType::Date => "DATE".into(),
        FieldType::DateTime => "TIMESTAMPTZ".into(),
        FieldType::Json => "JSONB".into(),
        FieldType::Enum(values) => {
            let quoted: Vec<String> = values.iter().map(|v| format!("'{v}'")).collect();
            format!("TEXT CHECK ({column} IN ({}))", quoted.join(", "))
        }
        FieldType::Reference(target) => {
            let table = Entity::new(target.clone(), Vec::new()).collection_name();
            format!("UUID REFERENCES {table}(id)")
        }
    }
}

fn ts_type(field_type: &FieldType) -> &'static str {
    match field_type {
        FieldType::Integer | FieldType::Decimal => "number",
        FieldType::Boolean => "boolean",
        FieldType::Json => "Record<string, unknown>",
        _ => "string",
    }
}

fn create_table(entity: &Entity) -> String {
    let mut columns = Vec::new();
    if !entity.fields.iter().any(|f| f.name == "id") {
        columns.push("    id UUID PRIMARY KEY DEFAULT gen_random_uuid()".to_string());
    }
    for field in &entity.fields {
        let mut column = format!(
            "    {} {}",
            field.name,
            sql_type(&field.name, &field.field_type)
        );
        if field.name == "id" {
            column.push_str(" PRIMARY KEY");
        } else {
            if field.required {
                column.push_str(" NOT NULL");
            }
            if field.unique {
                column.push_str(" UNIQUE");
            }
        }
        columns.push(column);
    }
    columns.push("    created_at TIMESTAMPTZ NOT NULL DEFAULT now()".to_string());
    format!(
        "CREATE TABLE {} (\n{}\n);\n",
        entity.collection_name(),
        columns.join(",\n")
    )
}

fn schema(blueprint: &Blueprint) -> GeneratedFile {
    let mut sql = format!("-- {} schema\n\n", blueprint.name);
    for entity in blueprint.generatable_entities() {
        sql.push_str(&create_table(entity));
        sql.push('\n');
    }
    GeneratedFile::new("schema/001_init.sql", sql, "sql")
}

fn routes(entity: &Entity) -> Vec<serde_json::Value> {
    let base = format!("/api/{}", entity.collection_name());
    CRUD_OPERATIONS
        .iter()
        .map(|(operation, method, by_id)| {
            let path = if *by_id {
                format!("{base}/:id")
            } else {
                base.clone()
            };
            json!({
                "entity": entity.name,
                "operation": operation,
                "method": method,
                "path": path,
            })
        })
        .collect()
}

fn handler_stub(entity: &Entity) -> String {
    let table = entity.collection_name();
    let mut out = format!(
        "import {{ Router }} from \"express\";\nimport {{ db }} from \"../db\";\n\n\
         export const {}Router = Router();\n\n",
        entity.snake_name()
    );
    out.push_str(&format!(
        "{0}Router.get(\"/\", async (_req, res) => res.json(await db.list(\"{1}\")));\n\
         {0}Router.get(\"/:id\", async (req, res) => res.json(await db.get(\"{1}\", req.params.id)));\n\
         {0}Router.post(\"/\", async (req, res) => res.status(201).json(await db.insert(\"{1}\", req.body)));\n\
         {0}Router.put(\"/:id\", async (req, res) => res.json(await db.update(\"{1}\", req.params.id, req.body)));\n\
         {0}Router.delete(\"/:id\", async (req, res) => res.status(204).json(await db.remove(\"{1}\", req.params.id)));\n",
        entity.snake_name(),
        table
    ));
    out
}

fn backend(blueprint: &Blueprint) -> anyhow::Result<Vec<GeneratedFile>> {
    let routes: Vec<serde_json::Value> = blueprint.generatable_entities().flat_map(routes).collect();
    let manifest = json!({
        "service": blueprint.name,
        "routes": routes,
        "roles": blueprint.roles,
    });
    let mut files = vec![GeneratedFile::new(
        "backend/routes.json",
        serde_json::to_string_pretty(&manifest)?,
        "json",
    )];
    for entity in blueprint.generatable_entities() {
        files.push(GeneratedFile::new(
            format!("backend/src/routes/{}.ts", entity.snake_name()),
            handler_stub(entity),
            "ts",
        ));
    }
    Ok(files)
}

fn list_page(entity: &Entity) -> GeneratedFile {
    let fields: Vec<&str> = entity.fields.iter().map(|f| f.name.as_str()).collect();
    let props: Vec<String> = entity
        .fields
        .iter()
        .map(|f| format!("  {}: {};", f.name, ts_type(&f.field_type)))
        .collect();
    let content = format!(
        "import {{ useResource }} from \"../api\";\n\n\
         export interface {name} {{\n{props}\n}}\n\n\
         const COLUMNS = {columns:?};\n\n\
         export default function {name}List() {{\n\
         \x20 const rows = useResource<{name}>(\"/api/{collection}\");\n\
         \x20 return <Table columns={{COLUMNS}} rows={{rows}} />;\n\
         }}\n",
        name = entity.name,
        props = props.join("\n"),
        columns = fields,
        collection = entity.collection_name(),
    );
    GeneratedFile::new(
        format!("frontend/src/pages/{}List.tsx", entity.name),
        content,
        "tsx",
    )
}

fn frontend(blueprint: &Blueprint) -> Vec<GeneratedFile> {
    let mut files: Vec<GeneratedFile> = blueprint.generatable_entities().map(list_page).collect();
    for page in blueprint.pages.iter().filter(|p| p.entity.is_none()) {
        files.push(GeneratedFile::new(
            format!("frontend/src/pages/{}.tsx", page.name),
            format!(
                "// route: {}\nexport default function {}() {{\n  return <main />;\n}}\n",
                page.route, page.name
            ),
            "tsx",
        ));
    }
    files
}

fn infrastructure(blueprint: &Blueprint) -> Vec<GeneratedFile> {
    let service = specforge_core::domain::blueprint::to_snake_case(&blueprint.name);
    let compose = format!(
        "services:\n\
         \x20 api:\n\
         \x20   build: ../backend\n\
         \x20   environment:\n\
         \x20     DATABASE_URL: postgres://{service}:${{POSTGRES_PASSWORD}}@db:5432/{service}\n\
         \x20   deploy:\n\
         \x20     replicas: {replicas}\n\
         \x20   depends_on: [db]\n\
         \x20 web:\n\
         \x20   build: ../frontend\n\
         \x20   ports: [\"8080:80\"]\n\
         \x20 db:\n\
         \x20   image: postgres:16\n\
         \x20   environment:\n\
         \x20     POSTGRES_USER: {service}\n\
         \x20     POSTGRES_PASSWORD: ${{POSTGRES_PASSWORD}}\n\
         \x20     POSTGRES_DB: {service}\n",
        replicas = blueprint.infra_size.replicas(),
    );
    vec![
        GeneratedFile::new("infra/docker-compose.yml", compose, "yaml"),
        GeneratedFile::new("infra/.env.example", "POSTGRES_PASSWORD=\n", "env"),
    ]
}

fn tests(blueprint: &Blueprint) -> Vec<GeneratedFile> {
    blueprint
        .generatable_entities()
        .map(|entity| {
            let collection = entity.collection_name();
            let content = format!(
                "import {{ api }} from \"./client\";\n\n\
                 describe(\"/api/{collection}\", () => {{\n\
                 \x20 it(\"lists {collection}\", async () => {{\n\
                 \x20   expect((await api.get(\"/api/{collection}\")).status).toBe(200);\n\
                 \x20 }});\n\
                 \x20 it(\"rejects an empty {name}\", async () => {{\n\
                 \x20   expect((await api.post(\"/api/{collection}\", {{}})).status).toBe(400);\n\
                 \x20 }});\n\
                 }});\n",
                name = entity.snake_name(),
            );
            GeneratedFile::new(
                format!("tests/api/{}.test.ts", entity.snake_name()),
                content,
                "ts",
            )
        })
        .collect()
}

/// Markdown overview of a blueprint's entities and endpoints.
pub fn documentation(blueprint: &Blueprint) -> GeneratedFile {
    let mut md = format!("# {}\n\n## Entities\n", blueprint.name);
    for entity in blueprint.generatable_entities() {
        md.push_str(&format!("\n### {}\n\n| Field | Type |\n|---|---|\n", entity.name));
        for field in &entity.fields {
            md.push_str(&format!("| {} | {} |\n", field.name, field.field_type.tag()));
        }
        md.push_str("\nEndpoints:\n");
        for route in routes(entity) {
            let method = route["method"].as_str().unwrap_or_default();
            let path = route["path"].as_str().unwrap_or_default();
            md.push_str(&format!("- `{method} {path}`\n"));
        }
    }
    GeneratedFile::new("docs/README.md", md, "markdown")
}
