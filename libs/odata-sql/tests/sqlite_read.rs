#![allow(clippy::unwrap_used, clippy::expect_used)]

use odata_edm::Edm;
use odata_sql::{
    Metamodel, QueryConfig, QueryError, QueryProcessor, ReadResult, ServiceMapping, SqlBackend,
};
use odata_uri::{Parser, UriInfo};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use serde_json::{Value, json};
use tempfile::TempDir;

const EDM: &str = include_str!("../../../testdata/demo/edm.json");
const MAPPING: &str = include_str!("../../../testdata/demo/mapping.json");
const SCHEMA: &str = include_str!("../../../testdata/demo/schema.sql");
const SEED: &str = include_str!("../../../testdata/demo/seed.sql");

struct Demo {
    processor: QueryProcessor,
    conn: DatabaseConnection,
    _dir: TempDir,
}

impl Demo {
    async fn new() -> Self {
        Self::with(QueryConfig::default(), Vec::new()).await
    }

    async fn with(config: QueryConfig, groups: Vec<String>) -> Self {
        let edm = Edm::from_json(EDM).unwrap();
        let mapping = ServiceMapping::from_json(MAPPING).unwrap();
        let metamodel = Metamodel::new(&edm, &mapping).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("demo.db").display());
        let conn = Database::connect(&url).await.unwrap();
        conn.execute_unprepared(SCHEMA).await.unwrap();
        conn.execute_unprepared(SEED).await.unwrap();
        Self {
            processor: QueryProcessor::new(edm, metamodel, config).with_groups(groups),
            conn,
            _dir: dir,
        }
    }

    fn parse(&self, path: &str, query: &str) -> UriInfo {
        Parser::new(self.processor.edm())
            .parse_uri(path, query)
            .unwrap()
    }

    async fn run(&self, path: &str, query: &str) -> Result<ReadResult, QueryError> {
        let info = self.parse(path, query);
        self.processor.execute(&self.conn, &info).await
    }

    async fn collection(&self, path: &str, query: &str) -> Vec<Value> {
        match self.run(path, query).await.unwrap() {
            ReadResult::Collection(c) => c.value,
            other => panic!("expected a collection, got {other:?}"),
        }
    }

    async fn entity(&self, path: &str, query: &str) -> Value {
        match self.run(path, query).await.unwrap() {
            ReadResult::Entity(e) => Value::Object(e),
            other => panic!("expected an entity, got {other:?}"),
        }
    }
}

fn names(values: &[Value]) -> Vec<&str> {
    values.iter().map(|v| v["Name"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn reads_an_entity_with_complex_enum_and_collection_values() {
    let demo = Demo::new().await;
    let alice = demo.entity("People(1)", "").await;
    assert_eq!(alice["Name"], json!("Alice"));
    assert_eq!(alice["HomeAddress"]["City"], json!("Berlin"));
    assert_eq!(alice["FavoriteColor"], json!("Red"));
    assert_eq!(alice["Tags"], json!(["vip", "early"]));
    assert_eq!(alice["Addresses"][1]["City"], json!("Potsdam"));
    assert_eq!(alice["@odata.etag"], json!("W/\"3\""));
    // Salary belongs to the hr group.
    assert!(alice.get("Salary").is_none());
}

#[tokio::test]
async fn missing_entities_are_not_found() {
    let demo = Demo::new().await;
    let err = demo.run("People(99)", "").await.unwrap_err();
    assert!(matches!(err, QueryError::NotFound));
}

#[tokio::test]
async fn filters_and_orders_collections() {
    let demo = Demo::new().await;
    let people = demo.collection("People", "$filter=Age gt 30&$orderby=Name").await;
    assert_eq!(names(&people), ["Alice", "Carol", "Dan_Smith"]);

    let people = demo
        .collection("People", "$filter=HomeAddress/City eq 'Berlin'&$orderby=Id desc")
        .await;
    assert_eq!(names(&people), ["Carol", "Alice"]);

    let people = demo.collection("People", "$filter=Email eq null").await;
    assert_eq!(names(&people), ["Carol"]);
}

#[tokio::test]
async fn like_patterns_escape_wildcards() {
    let demo = Demo::new().await;
    let people = demo.collection("People", "$filter=contains(Name,'_')").await;
    assert_eq!(names(&people), ["Dan_Smith"]);

    let people = demo
        .collection("People", "$filter=startswith(Name,'A') or endswith(Name,'ol')&$orderby=Id")
        .await;
    assert_eq!(names(&people), ["Alice", "Carol"]);
}

#[tokio::test]
async fn lambdas_and_counted_navigations() {
    let demo = Demo::new().await;
    let people = demo
        .collection("People", "$filter=Orders/any(o:o/Amount gt 200)")
        .await;
    assert_eq!(names(&people), ["Bob"]);

    let people = demo
        .collection("People", "$filter=Tags/any(t:t eq 'vip')&$orderby=Id")
        .await;
    assert_eq!(names(&people), ["Alice", "Carol"]);

    let people = demo
        .collection("People", "$orderby=Orders/$count desc,Id&$top=2")
        .await;
    assert_eq!(names(&people), ["Alice", "Bob"]);
}

#[tokio::test]
async fn type_casts_use_the_discriminator() {
    let demo = Demo::new().await;
    let employees = demo.collection("People/Demo.Employee", "$orderby=Id").await;
    assert_eq!(names(&employees), ["Alice", "Dan_Smith"]);
    assert_eq!(employees[1]["Department"], json!("Ops"));
}

#[tokio::test]
async fn counts_and_server_paging() {
    let demo = Demo::new().await;
    match demo.run("People/$count", "$filter=HomeAddress/City eq 'Berlin'").await.unwrap() {
        ReadResult::Count(n) => assert_eq!(n, 2),
        other => panic!("unexpected {other:?}"),
    }

    let info = demo.parse("People", "$top=2&$count=true&$orderby=Id");
    let page = demo.processor.read(&demo.conn, &info).await.unwrap();
    assert_eq!(page.count, Some(4));
    assert_eq!(names(&page.value), ["Alice", "Bob"]);
    assert_eq!(page.next_skip, None);

    let paged = Demo::with(QueryConfig::default().with_page_size(3), Vec::new()).await;
    let info = paged.parse("People", "$orderby=Id");
    let page = paged.processor.read(&paged.conn, &info).await.unwrap();
    assert_eq!(page.value.len(), 3);
    assert_eq!(page.next_skip, Some(3));
    let body = page.to_json(Some("/People?$orderby=Id"));
    assert_eq!(body["@odata.nextLink"], json!("/People?$orderby=Id&$skiptoken=3"));

    let mut info = paged.parse("People", "$orderby=Id");
    info.skiptoken = Some("3".to_owned());
    let last = paged.processor.read(&paged.conn, &info).await.unwrap();
    assert_eq!(names(&last.value), ["Dan_Smith"]);
    assert_eq!(last.next_skip, None);
}

#[tokio::test]
async fn next_links_stop_at_the_requested_top() {
    let paged = Demo::with(QueryConfig::default().with_page_size(2), Vec::new()).await;
    let mut url = "/People?$top=3&$orderby=Id".to_owned();
    let mut seen = Vec::new();
    for _ in 0..4 {
        let query = url.split_once('?').unwrap().1.to_owned();
        let info = paged.parse("People", &query);
        let page = paged.processor.read(&paged.conn, &info).await.unwrap();
        seen.extend(names(&page.value).into_iter().map(str::to_owned));
        match page.to_json(Some(&url))["@odata.nextLink"].as_str() {
            Some(next) => url = next.to_owned(),
            None => break,
        }
    }
    assert_eq!(seen, ["Alice", "Bob", "Carol"]);
    assert_eq!(url, "/People?$top=3&$orderby=Id&$skiptoken=2");
}

#[tokio::test]
async fn expands_navigations_per_parent() {
    let demo = Demo::new().await;
    let alice = demo
        .entity("People(1)", "$expand=Orders($orderby=Id;$top=2;$count=true)")
        .await;
    let orders = alice["Orders"].as_array().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["Id"], json!(10));
    assert_eq!(alice["Orders@odata.count"], json!(3));

    let bob = demo.entity("People(2)", "$expand=Manager($select=Name)").await;
    assert_eq!(bob["Manager"]["Name"], json!("Alice"));

    let order = demo.entity("Orders(10)", "$expand=Items($orderby=Line),Customer").await;
    assert_eq!(order["Items"].as_array().unwrap().len(), 2);
    assert_eq!(order["Items"][1]["Product"], json!("Paper"));
    assert_eq!(order["Customer"]["Name"], json!("Alice"));

    let people = demo
        .collection("People", "$expand=Orders/$count&$orderby=Id")
        .await;
    assert_eq!(people[0]["Orders@odata.count"], json!(3));
    assert_eq!(people[3]["Orders@odata.count"], json!(0));
}

#[tokio::test]
async fn expands_references_through_join_tables() {
    let demo = Demo::new().await;
    let alice = demo.entity("People(1)", "$expand=Friends/$ref").await;
    let mut ids: Vec<&str> = alice["Friends"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["@odata.id"].as_str().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, ["People(2)", "People(3)"]);
}

#[tokio::test]
async fn reads_properties_and_values() {
    let demo = Demo::new().await;
    let info = demo.parse("People(1)/Name", "");
    let name = demo.processor.read_property(&demo.conn, &info).await.unwrap();
    assert_eq!(name, json!("Alice"));

    match demo.run("People(1)/Name/$value", "").await.unwrap() {
        ReadResult::Raw(text) => assert_eq!(text, "Alice"),
        other => panic!("unexpected {other:?}"),
    }
    match demo.run("People(1)/Tags", "").await.unwrap() {
        ReadResult::Value(v) => assert_eq!(v, json!(["vip", "early"])),
        other => panic!("unexpected {other:?}"),
    }
    match demo.run("People(1)/HomeAddress", "").await.unwrap() {
        ReadResult::Value(v) => assert_eq!(v["Street"], json!("1 Main St")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn media_entities_return_their_stream() {
    let demo = Demo::new().await;
    match demo
        .run("Documents(5f2b6c1e-8a7d-4d1a-9c3e-2b4f6a8d0e11)/$value", "")
        .await
        .unwrap()
    {
        ReadResult::Media { content_type, data } => {
            assert_eq!(content_type.as_deref(), Some("text/plain"));
            assert_eq!(data, b"hello");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn restricted_fields_need_their_group() {
    let demo = Demo::new().await;
    let err = demo.run("People", "$select=Salary").await.unwrap_err();
    assert!(matches!(err, QueryError::Forbidden(_)));

    let hr = Demo::with(QueryConfig::default(), vec!["hr".to_owned()]).await;
    let people = hr.collection("People", "$select=Salary&$orderby=Id").await;
    assert_eq!(people[1]["Salary"].as_f64(), Some(60000.0));
}

#[tokio::test]
async fn search_matches_mapped_columns() {
    let demo = Demo::new().await;
    let people = demo.collection("People", "$search=alice").await;
    assert_eq!(names(&people), ["Alice"]);
    let people = demo.collection("People", "$search=example NOT org&$orderby=Id").await;
    assert_eq!(names(&people), ["Alice", "Bob"]);
}

#[tokio::test]
async fn aggregates_groups() {
    let demo = Demo::new().await;
    let groups = demo
        .collection(
            "Orders",
            "$apply=groupby((Status),aggregate(Amount with sum as Total))&$orderby=Status",
        )
        .await;
    let statuses: Vec<&str> = groups.iter().map(|g| g["Status"].as_str().unwrap()).collect();
    assert_eq!(statuses, ["cancelled", "open", "shipped"]);
    assert_eq!(groups[1]["Total"].as_f64(), Some(400.5));

    let totals = demo
        .collection("Orders", "$apply=filter(Status eq 'open')/aggregate($count as N)")
        .await;
    assert_eq!(totals[0]["N"], json!(2));
}

#[tokio::test]
async fn aggregates_over_related_rows_count_each_entity_once() {
    let demo = Demo::new().await;
    let totals = demo
        .collection(
            "People",
            "$apply=aggregate(Age with sum as Total,Orders/$count as N,Friends/$count as F)",
        )
        .await;
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0]["Total"].as_f64(), Some(157.0));
    assert_eq!(totals[0]["N"], json!(5));
    assert_eq!(totals[0]["F"], json!(3));

    let older = demo
        .collection("People", "$apply=filter(Age gt 30)/aggregate(Orders/$count as N)")
        .await;
    assert_eq!(older[0]["N"], json!(4));
}

#[tokio::test]
async fn inline_aggregates_reach_through_navigations() {
    let demo = Demo::new().await;
    let totals = demo
        .collection(
            "People",
            "$apply=aggregate(Age with max as Oldest,Orders(Amount with sum as Spent),\
             Orders(Amount with average as Avg),Orders(Status with countdistinct as S))",
        )
        .await;
    assert_eq!(totals[0]["Oldest"], json!(52));
    assert_eq!(totals[0]["Spent"].as_f64(), Some(470.5));
    let avg = totals[0]["Avg"].as_f64().unwrap();
    assert!((avg - 94.1).abs() < 1e-9, "{avg}");
    assert_eq!(totals[0]["S"], json!(3));

    let cities = demo
        .collection(
            "People",
            "$apply=groupby((HomeAddress/City),aggregate(Orders(Amount with sum as Spent),\
             Orders(Status with countdistinct as S),$count as Members))\
             &$orderby=HomeAddress/City",
        )
        .await;
    let names: Vec<&str> = cities
        .iter()
        .map(|g| g["HomeAddress"]["City"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Berlin", "Hamburg", "Munich"]);
    assert_eq!(cities[0]["Spent"].as_f64(), Some(170.5));
    assert_eq!(cities[0]["S"], json!(3));
    assert_eq!(cities[0]["Members"], json!(2));
    assert_eq!(cities[1]["Spent"], Value::Null);
    assert_eq!(cities[1]["S"], json!(0));
    assert_eq!(cities[2]["Spent"].as_f64(), Some(300.0));
    assert_eq!(cities[2]["S"], json!(1));
}

#[tokio::test]
async fn groups_through_to_one_navigations() {
    let demo = Demo::new().await;
    let groups = demo
        .collection(
            "Orders",
            "$apply=groupby((Customer/Name),aggregate(Amount with sum as Total))\
             &$orderby=Customer/Name",
        )
        .await;
    let customers: Vec<&str> = groups
        .iter()
        .map(|g| g["Customer"]["Name"].as_str().unwrap())
        .collect();
    assert_eq!(customers, ["Alice", "Bob", "Carol"]);
    assert_eq!(groups[0]["Total"].as_f64(), Some(125.5));
    assert_eq!(groups[1]["Total"].as_f64(), Some(300.0));
}

#[tokio::test]
async fn top_bottom_concat_and_compute() {
    let demo = Demo::new().await;
    let ids = |rows: &[Value]| -> Vec<i64> {
        rows.iter().map(|r| r["Id"].as_i64().unwrap()).collect()
    };

    let top = demo
        .collection("Orders", "$apply=topcount(2,Amount)&$orderby=Amount desc")
        .await;
    assert_eq!(ids(&top), [12, 10]);
    let bottom = demo
        .collection("Orders", "$apply=bottomcount(2,Amount)&$orderby=Amount")
        .await;
    assert_eq!(ids(&bottom), [14, 11]);

    let both = demo
        .collection(
            "Orders",
            "$apply=concat(topcount(1,Amount),bottomcount(1,Amount))&$orderby=Id",
        )
        .await;
    assert_eq!(ids(&both), [12, 14]);

    let mixed = demo
        .collection(
            "Orders",
            "$apply=concat(topcount(1,Amount),aggregate(Amount with sum as Total))",
        )
        .await;
    assert_eq!(mixed.len(), 2);
    assert!(mixed.iter().any(|r| r["Id"] == json!(12) && r["Total"].is_null()));
    assert!(mixed.iter().any(|r| r["Id"].is_null() && r["Total"].as_f64() == Some(470.5)));

    let doubled = demo
        .collection(
            "Orders",
            "$apply=compute(Amount mul 2 as Double)/filter(Double gt 100)&$orderby=Id",
        )
        .await;
    assert_eq!(ids(&doubled), [10, 12]);
    assert_eq!(doubled[0]["Double"].as_f64(), Some(201.0));
    assert_eq!(doubled[1]["Double"].as_f64(), Some(600.0));
}

#[tokio::test]
async fn orders_by_several_counted_navigations() {
    let demo = Demo::new().await;
    demo.conn
        .execute_unprepared(
            "INSERT INTO friendships (person_id, friend_id) VALUES (3, 1), (3, 2), (3, 4)",
        )
        .await
        .unwrap();
    let people = demo
        .collection("People", "$orderby=Friends/$count desc,Orders/$count desc,Id")
        .await;
    assert_eq!(names(&people), ["Carol", "Alice", "Bob", "Dan_Smith"]);

    let paged = demo
        .collection(
            "People",
            "$orderby=Friends/$count desc,Orders/$count desc,Id&$top=1&$skip=1",
        )
        .await;
    assert_eq!(names(&paged), ["Alice"]);
}

#[tokio::test]
async fn singletons_read_one_row() {
    let demo = Demo::new().await;
    let me = demo.entity("Me", "").await;
    assert_eq!(me["Id"], json!(1));
}

#[tokio::test]
async fn statements_render_without_a_connection() {
    let demo = Demo::new().await;
    let info = demo.parse("People", "$filter=contains(Name,'_')&$expand=Orders");
    let planned = demo.processor.statements(SqlBackend::Sqlite, &info).unwrap();
    let main = planned.iter().find(|p| p.name == "main").unwrap();
    assert!(main.sql.contains("\"people\" AS \"t0\""));
    assert!(main.sql.contains("ESCAPE"));
    assert!(planned.iter().any(|p| p.name == "expand Orders"));
    assert!(planned.iter().any(|p| p.name == "collection Tags"));

    let pg = demo.processor.statements(SqlBackend::Postgres, &info).unwrap();
    assert!(pg.iter().all(|p| !p.sql.is_empty()));
}
