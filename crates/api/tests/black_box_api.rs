//! Black-box tests: the real router on an ephemeral port, with fake external
//! collaborators (portal automation, OCR engine) injected at the boundary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use facturo_api::app::{self, services::AppServices};
use facturo_infra::jobs::queue::QueueConfig;
use facturo_ocr::{OcrError, TextRecognizer};
use facturo_sunat::{
    AcquisitionRequest, DocumentRetriever, RetrievalFailure, RetrievedDocument, RetrievedFiles,
};

type RetrievalOutcome = Result<RetrievedDocument, RetrievalFailure>;

/// Plays back a scripted sequence of outcomes, then repeats the fallback.
struct ScriptedRetriever {
    script: Mutex<Vec<RetrievalOutcome>>,
    fallback: RetrievalOutcome,
}

impl ScriptedRetriever {
    fn new(mut script: Vec<RetrievalOutcome>, fallback: RetrievalOutcome) -> Arc<Self> {
        script.reverse(); // pop() from the back == play in order
        Arc::new(Self {
            script: Mutex::new(script),
            fallback,
        })
    }

    fn always(outcome: RetrievalOutcome) -> Arc<Self> {
        Self::new(Vec::new(), outcome)
    }
}

impl DocumentRetriever for ScriptedRetriever {
    fn retrieve(&self, _request: &AcquisitionRequest) -> RetrievalOutcome {
        self.script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Recognizer that "reads" a fixed text off any image.
struct CannedRecognizer {
    text: String,
}

impl TextRecognizer for CannedRecognizer {
    fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

fn retrieved_invoice(reference: &str, descriptions: &[&str]) -> RetrievedDocument {
    let lines: Vec<serde_json::Value> = descriptions
        .iter()
        .map(|description| {
            json!({
                "cbc:InvoicedQuantity": {"_": "1", "unitCode": "NIU"},
                "cac:Item": {"cbc:Description": description},
                "cac:Price": {"cbc:PriceAmount": "50.00"}
            })
        })
        .collect();

    RetrievedDocument {
        files: RetrievedFiles {
            primary: b"<Invoice/>".to_vec(),
            rendered: None,
            acknowledgment: None,
        },
        structured: json!({
            "Invoice": {
                "cbc:ID": reference,
                "cbc:IssueDate": "2024-03-15",
                "cac:AccountingSupplierParty": {
                    "cac:Party": {
                        "cac:PartyIdentification": {"cbc:ID": "20100113610"},
                        "cac:PartyLegalEntity": {"cbc:RegistrationName": "ACME SAC"}
                    }
                },
                "cac:TaxTotal": {"cbc:TaxAmount": "18.00"},
                "cac:LegalMonetaryTotal": {
                    "cbc:LineExtensionAmount": "100.00",
                    "cbc:PayableAmount": "118.00"
                },
                "cac:InvoiceLine": lines
            }
        }),
        authority_status: Some("ACCEPTED".to_string()),
    }
}

fn unparseable_document() -> RetrievedDocument {
    RetrievedDocument {
        files: RetrievedFiles {
            primary: b"<garbage/>".to_vec(),
            rendered: None,
            acknowledgment: None,
        },
        structured: json!({"Invoice": {"cbc:ID": "no dash"}}),
        authority_status: None,
    }
}

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(retriever: Arc<dyn DocumentRetriever>, recognizer_text: &str) -> Self {
        let recognizer = Arc::new(CannedRecognizer {
            text: recognizer_text.to_string(),
        });
        let services = AppServices::build(retriever, recognizer, None, QueueConfig::default(), 2);

        let app = app::build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.services.shutdown();
        self.handle.abort();
    }
}

async fn poll_job_until(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    terminal: &str,
) -> serde_json::Value {
    // The outcome is only reachable asynchronously; poll the registry.
    for _ in 0..400 {
        let res = client
            .get(format!("{base_url}/acquisitions/{job_id}"))
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if body["state"] == terminal {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not reach {terminal} within timeout");
}

fn enqueue_body(series: &str, number: &str, max_attempts: u32) -> serde_json::Value {
    json!({
        "issuer_tax_id": "20100113610",
        "series": series,
        "number": number,
        "credentials": {
            "account_tax_id": "20553697702",
            "username": "MODDATOS",
            "password": "moddatos",
        },
        "max_attempts": max_attempts,
        "backoff_base_ms": 10,
    })
}

fn bulk_body(series: &str, number: &str, line_descriptions: &[&str]) -> serde_json::Value {
    let line_items: Vec<serde_json::Value> = line_descriptions
        .iter()
        .map(|d| json!({"description": d, "quantity": 1, "unit_cost": "50.00"}))
        .collect();

    json!({
        "invoices": [{
            "supplier_tax_id": "20100113610",
            "supplier_name": "ACME SAC",
            "series": series,
            "number": number,
            "issued_on": "15/03/2024",
            "currency": "PEN",
            "subtotal": "100.00",
            "tax_amount": 18.0,
            "total": "118.00",
            "line_items": line_items,
        }]
    })
}

#[tokio::test]
async fn health_endpoint_answers() {
    let srv = TestServer::spawn(
        ScriptedRetriever::always(Err(RetrievalFailure::LoginRejected)),
        "",
    )
    .await;

    let res = reqwest::Client::new()
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn bulk_create_then_acquisition_resubmit_registers_and_replaces_lines() {
    let retriever = ScriptedRetriever::always(Ok(retrieved_invoice("F001-103077", &["hammer"])));
    let srv = TestServer::spawn(retriever, "").await;
    let client = reqwest::Client::new();

    // Bulk submission with two line items while no invoice exists.
    let res = client
        .post(format!("{}/invoices/batch", srv.base_url))
        .json(&bulk_body("F001", "103077", &["nails", "screws"]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["results"][0]["created"], true);
    assert_eq!(body["results"][0]["status"], "CONSULTED");

    let res = client
        .get(format!("{}/invoices/F001-103077", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let invoice: serde_json::Value = res.json().await.unwrap();
    assert_eq!(invoice["status"], "CONSULTED");
    assert_eq!(invoice["line_items"].as_array().unwrap().len(), 2);

    // Same invoice again, via acquisition, with one line item.
    let res = client
        .post(format!("{}/acquisitions", srv.base_url))
        .json(&enqueue_body("F001", "103077", 3))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let job: serde_json::Value = res.json().await.unwrap();
    let job_id = job["job_id"].as_str().unwrap().to_string();

    let status = poll_job_until(&client, &srv.base_url, &job_id, "COMPLETED").await;
    assert_eq!(status["result"]["persisted"], true);

    let res = client
        .get(format!("{}/invoices/F001-103077", srv.base_url))
        .send()
        .await
        .unwrap();
    let invoice: serde_json::Value = res.json().await.unwrap();
    assert_eq!(invoice["status"], "REGISTERED");
    let lines = invoice["line_items"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["description"], "hammer");
    assert!(invoice["document"].is_object());
}

#[tokio::test]
async fn job_that_fails_twice_then_succeeds_completes_after_three_attempts() {
    let retriever = ScriptedRetriever::new(
        vec![
            Err(RetrievalFailure::AutomationFailed("portal hiccup".to_string())),
            Err(RetrievalFailure::AutomationFailed("portal hiccup".to_string())),
            Ok(retrieved_invoice("E001-206", &["gasohol"])),
        ],
        Err(RetrievalFailure::AutomationFailed("script exhausted".to_string())),
    );
    let srv = TestServer::spawn(retriever, "").await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/acquisitions", srv.base_url))
        .json(&enqueue_body("E001", "206", 3))
        .send()
        .await
        .unwrap();
    let job: serde_json::Value = res.json().await.unwrap();
    let job_id = job["job_id"].as_str().unwrap().to_string();

    // Ends COMPLETED; the two failures were retried under backoff, never a
    // terminal FAILED.
    let status = poll_job_until(&client, &srv.base_url, &job_id, "COMPLETED").await;
    assert_eq!(status["progress"]["attempts_made"], 3);
    assert_eq!(status["progress"]["max_attempts"], 3);
    assert_eq!(status["result"]["persisted"], true);

    let res = client
        .get(format!("{}/invoices/E001-206", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn untransformable_document_exhausts_attempts_and_creates_nothing() {
    let retriever = ScriptedRetriever::always(Ok(unparseable_document()));
    let srv = TestServer::spawn(retriever, "").await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/acquisitions", srv.base_url))
        .json(&enqueue_body("E001", "206", 3))
        .send()
        .await
        .unwrap();
    let job: serde_json::Value = res.json().await.unwrap();
    let job_id = job["job_id"].as_str().unwrap().to_string();

    let status = poll_job_until(&client, &srv.base_url, &job_id, "FAILED").await;
    assert_eq!(status["progress"]["attempts_made"], 3);
    assert!(
        status["failure_reason"]
            .as_str()
            .unwrap()
            .contains("transformation")
    );

    let res = client
        .get(format!("{}/invoices/E001-206", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ocr_path_creates_an_invoice_at_consulted() {
    let receipt = "FERRETERIA EL TORNILLO\nRUC: 20100113610\nF001-103077\n15/03/2024\nTOTAL S/ 1.180,00\n";
    let srv = TestServer::spawn(
        ScriptedRetriever::always(Err(RetrievalFailure::LoginRejected)),
        receipt,
    )
    .await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/invoices/recognize", srv.base_url))
        .body("fake image bytes".as_bytes().to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["created"], true);
    assert_eq!(body["reference"], "F001-00103077");
    assert_eq!(body["detected"]["tax_id"], "20100113610");

    // Same receipt again: merged, not duplicated.
    let res = client
        .post(format!("{}/invoices/recognize", srv.base_url))
        .body("fake image bytes".as_bytes().to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["created"], false);

    let res = client
        .get(format!("{}/invoices/f1-000103077", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let invoice: serde_json::Value = res.json().await.unwrap();
    assert_eq!(invoice["status"], "CONSULTED");
    assert_eq!(invoice["total"], "1180.00");
}

#[tokio::test]
async fn unknown_job_ids_are_not_found() {
    let srv = TestServer::spawn(
        ScriptedRetriever::always(Err(RetrievalFailure::LoginRejected)),
        "",
    )
    .await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!(
            "{}/acquisitions/00000000-0000-7000-8000-000000000000",
            srv.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/acquisitions/not-a-uuid", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn purge_wipes_queued_jobs() {
    let retriever = ScriptedRetriever::always(Err(RetrievalFailure::AutomationFailed(
        "down".to_string(),
    )));
    let srv = TestServer::spawn(retriever, "").await;
    let client = reqwest::Client::new();

    let mut job_ids = Vec::new();
    for number in ["101", "102"] {
        let res = client
            .post(format!("{}/acquisitions", srv.base_url))
            .json(&json!({
                "issuer_tax_id": "20100113610",
                "series": "E001",
                "number": number,
                "credentials": {
                    "account_tax_id": "20553697702",
                    "username": "MODDATOS",
                    "password": "moddatos",
                },
                "max_attempts": 5,
                // Park retries far in the future so the jobs stay visible.
                "backoff_base_ms": 600_000,
            }))
            .send()
            .await
            .unwrap();
        let job: serde_json::Value = res.json().await.unwrap();
        job_ids.push(job["job_id"].as_str().unwrap().to_string());
    }

    let res = client
        .delete(format!("{}/acquisitions", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["purged"].as_u64().unwrap() >= 1);

    for job_id in job_ids {
        let res = client
            .get(format!("{}/acquisitions/{job_id}", srv.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn posting_is_terminal_even_for_later_bulk_resubmissions() {
    let srv = TestServer::spawn(
        ScriptedRetriever::always(Err(RetrievalFailure::LoginRejected)),
        "",
    )
    .await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/invoices/batch", srv.base_url))
        .json(&bulk_body("F001", "55", &["thing"]))
        .send()
        .await
        .unwrap();

    let res = client
        .post(format!("{}/invoices/F001-55/post", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let invoice: serde_json::Value = res.json().await.unwrap();
    assert_eq!(invoice["status"], "POSTED");

    // Re-submitting does not demote it to REGISTERED.
    let res = client
        .post(format!("{}/invoices/batch", srv.base_url))
        .json(&bulk_body("F001", "55", &["other thing"]))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["results"][0]["status"], "POSTED");

    let res = client
        .get(format!("{}/invoices/F001-55", srv.base_url))
        .send()
        .await
        .unwrap();
    let invoice: serde_json::Value = res.json().await.unwrap();
    assert_eq!(invoice["status"], "POSTED");
    assert_eq!(invoice["display_status"], "POSTED");
}
